//! Undo log of one service command.
//!
//! A command saves its own tree first and then works through side effects
//! that may create or change other trees, links and process instances. Each
//! write is recorded here so a failure further down can put the store back
//! the way the command found it.

use tracing::warn;

use crate::db::{EmbeddedLink, ExecutionStore};
use crate::engine::tree::ExecutionTree;
use crate::result_ext::ResultExt;
use crate::services::coordinator::SubInstanceCoordinator;

struct TreeWrite {
    case_instance_id: String,
    /// Tree as loaded before the first write; `None` for trees the command created.
    before: Option<ExecutionTree>,
    /// Stored revision after the last write; `None` once deleted.
    revision: Option<u64>,
}

enum Step {
    LinkSaved(String),
    LinkRemoved(EmbeddedLink),
    ProcessStarted(String),
}

#[derive(Default)]
pub(crate) struct Journal {
    trees: Vec<TreeWrite>,
    steps: Vec<Step>,
}

impl Journal {
    pub(crate) fn is_empty(&self) -> bool {
        self.trees.is_empty() && self.steps.is_empty()
    }

    fn entry(&mut self, case_instance_id: &str, before: Option<ExecutionTree>) -> &mut TreeWrite {
        let index = match self
            .trees
            .iter()
            .position(|write| write.case_instance_id == case_instance_id)
        {
            Some(index) => index,
            None => {
                self.trees.push(TreeWrite {
                    case_instance_id: case_instance_id.to_string(),
                    before,
                    revision: None,
                });
                self.trees.len() - 1
            }
        };
        &mut self.trees[index]
    }

    /// Only the first snapshot of a tree is kept.
    pub(crate) fn tree_saved(&mut self, case_instance_id: &str, before: Option<ExecutionTree>, revision: u64) {
        self.entry(case_instance_id, before).revision = Some(revision);
    }

    pub(crate) fn tree_deleted(&mut self, before: ExecutionTree) {
        let case_instance_id = before.case_instance_id.clone();
        self.entry(&case_instance_id, Some(before)).revision = None;
    }

    pub(crate) fn link_saved(&mut self, embedded_instance_id: &str) {
        self.steps.push(Step::LinkSaved(embedded_instance_id.to_string()));
    }

    pub(crate) fn link_removed(&mut self, link: EmbeddedLink) {
        self.steps.push(Step::LinkRemoved(link));
    }

    pub(crate) fn process_started(&mut self, process_instance_id: &str) {
        self.steps.push(Step::ProcessStarted(process_instance_id.to_string()));
    }

    /// Undo every recorded write, newest first.
    ///
    /// Failures are logged and skipped so one bad step does not keep the
    /// remaining ones from running. Process instances terminated by the
    /// command cannot be revived and stay terminated.
    pub(crate) async fn rollback(self, store: &dyn ExecutionStore, coordinator: &SubInstanceCoordinator) {
        warn!(
            trees = self.trees.len(),
            steps = self.steps.len(),
            "Rolling back failed command"
        );

        for step in self.steps.into_iter().rev() {
            let _ = match step {
                Step::LinkSaved(id) => store
                    .delete_link(&id)
                    .await
                    .log(format!("removing link of embedded instance '{}'", id)),
                Step::LinkRemoved(link) => {
                    let id = link.embedded_instance_id.clone();
                    store
                        .save_link(link)
                        .await
                        .log(format!("restoring link of embedded instance '{}'", id))
                }
                Step::ProcessStarted(id) => coordinator
                    .abort_process(&id)
                    .await
                    .log(format!("aborting process instance '{}'", id)),
            };
        }

        for write in self.trees.into_iter().rev() {
            let id = write.case_instance_id;
            let _ = match (write.before, write.revision) {
                (None, Some(revision)) => store
                    .delete_tree(&id, revision)
                    .await
                    .log(format!("removing case instance '{}'", id)),
                (None, None) => Ok(()),
                (Some(before), Some(revision)) => store
                    .save_tree(before, revision)
                    .await
                    .map(|_| ())
                    .log(format!("restoring case instance '{}'", id)),
                (Some(before), None) => store
                    .save_tree(before, 0)
                    .await
                    .map(|_| ())
                    .log(format!("restoring closed case instance '{}'", id)),
            };
        }
    }
}
