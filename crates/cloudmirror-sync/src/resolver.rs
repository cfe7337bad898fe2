//! Parent-path dependency resolver
//!
//! A change depends on the nearest change in the same input that creates or
//! renames one of its ancestor folders. Chains are flattened onto their root:
//! the root becomes top-level and carries every descendant, shallowest first.
//! A chain whose root is a failed change is handed back whole as errors.

use std::collections::HashMap;
use std::path::PathBuf;

use cloudmirror_core::domain::{
    Change, ChangeType, ChangeWithDependencies, ContentStream, ItemKind, PendingChange,
};
use cloudmirror_core::ports::{DependencyAssignment, IDependencyResolver};
use tracing::{debug, warn};

struct Node {
    change: Change,
    dependents: Vec<Change>,
    stream: Option<ContentStream>,
    failed: bool,
}

impl Node {
    fn creates_folder(&self) -> bool {
        self.change.item_kind() == ItemKind::Folder
            && matches!(
                self.change.change_type(),
                ChangeType::Created | ChangeType::Renamed
            )
    }
}

/// Default resolver ordering changes by folder ancestry
#[derive(Debug, Default, Clone, Copy)]
pub struct ParentPathResolver;

impl ParentPathResolver {
    pub fn new() -> Self {
        Self
    }

    /// Pure partitioning step behind [`IDependencyResolver::assign_dependencies`]
    pub fn partition(&self, pending: Vec<PendingChange>, failed: Vec<Change>) -> DependencyAssignment {
        let mut assignment = DependencyAssignment::default();
        let mut nodes: Vec<Node> = Vec::with_capacity(pending.len() + failed.len());

        for item in pending {
            let (change, dependents) = item.change.into_parts();
            if let Err(e) = change.validate() {
                warn!(event_id = %change.event_id(), error = %e, "Invalid change, handing back as error");
                assignment.top_level_errors.push(change);
                assignment.top_level_errors.extend(dependents);
                continue;
            }
            nodes.push(Node {
                change,
                dependents,
                stream: item.stream,
                failed: false,
            });
        }
        for change in failed {
            if change.validate().is_err() {
                assignment.top_level_errors.push(change);
                continue;
            }
            nodes.push(Node {
                change,
                dependents: Vec::new(),
                stream: None,
                failed: true,
            });
        }

        let mut folders: HashMap<PathBuf, usize> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if node.creates_folder() {
                folders.entry(node.change.new_path().to_path_buf()).or_insert(i);
            }
        }

        let anchors: Vec<Option<usize>> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                node.change
                    .new_path()
                    .ancestors()
                    .skip(1)
                    .find_map(|ancestor| folders.get(ancestor).copied())
                    .filter(|&anchor| anchor != i)
            })
            .collect();

        let root_of = |mut i: usize| {
            for _ in 0..nodes.len() {
                match anchors[i] {
                    Some(anchor) => i = anchor,
                    None => break,
                }
            }
            i
        };

        let mut attached: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..nodes.len() {
            let root = root_of(i);
            if root != i {
                attached.entry(root).or_default().push(i);
            }
        }
        let roots: Vec<usize> = (0..nodes.len()).filter(|&i| root_of(i) == i).collect();

        let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
        for root in roots {
            let Some(root_node) = slots[root].take() else {
                continue;
            };
            let mut members: Vec<Node> = attached
                .remove(&root)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|i| slots[i].take())
                .collect();
            members.sort_by_key(|n| n.change.new_path().components().count());

            let mut dependents = root_node.dependents;
            for member in members {
                if member.stream.is_some() {
                    debug!(event_id = %member.change.event_id(), "Dependent content stream released until its turn");
                }
                dependents.push(member.change);
                dependents.extend(member.dependents);
            }

            if root_node.failed {
                assignment.top_level_errors.push(root_node.change);
                assignment.top_level_errors.extend(dependents);
            } else {
                assignment.top_level.push(PendingChange::new(
                    ChangeWithDependencies::with_dependencies(root_node.change, dependents),
                    root_node.stream,
                ));
            }
        }

        debug!(
            top_level = assignment.top_level.len(),
            errors = assignment.top_level_errors.len(),
            "Dependencies assigned"
        );
        assignment
    }
}

#[async_trait::async_trait]
impl IDependencyResolver for ParentPathResolver {
    async fn assign_dependencies(
        &self,
        pending: Vec<PendingChange>,
        failed: Vec<Change>,
    ) -> DependencyAssignment {
        self.partition(pending, failed)
    }
}
