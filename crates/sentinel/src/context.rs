//! Execution context propagation (C3).
//!
//! The source this was distilled from used Python `contextvars`. Rust's
//! analogue for "ambient, task-local, survives cooperative suspension" is
//! [`tokio::task_local!`]: a value that travels with a `tokio::task::Future`
//! across every `.await` point and is independent across sibling tasks
//! spawned from the same parent, which is exactly the isolation §5 requires.

use std::cell::RefCell;

use tokio::task_local;
use uuid::Uuid;

task_local! {
    static EXECUTION_ID: String;
    static NODE_STACK: RefCell<Vec<String>>;
}

/// Run `body` inside a fresh execution context: a new `execution_id` and
/// an empty node stack, both restored to whatever was ambient before (or
/// to nothing) once `body` completes.
///
/// Mirrors the source's `execution()` context manager: traces captured
/// inside `body` share one `execution_id`; parent/child edges are
/// inferred from the stack pushes performed by the capture pipeline.
pub async fn execution<F, Fut, T>(body: F) -> T
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let exec_id = Uuid::new_v4().to_string();
    let stack = RefCell::new(Vec::new());
    EXECUTION_ID
        .scope(exec_id.clone(), NODE_STACK.scope(stack, body(exec_id)))
        .await
}

/// The current `execution_id`, or a freshly synthesised one if no
/// [`execution`] scope is active. Per design note (d): calling this
/// outside a scope synthesises a *new* id every time, so two captures
/// outside any `execution()` block never share an id even if the caller
/// expected them to — this matches the source's observed behaviour.
#[must_use]
pub fn current_execution_id() -> String {
    EXECUTION_ID
        .try_with(Clone::clone)
        .unwrap_or_else(|_| Uuid::new_v4().to_string())
}

/// The top of the node stack, i.e. the parent for a call captured right
/// now. `None` if there is no active context or the stack is empty.
#[must_use]
pub fn current_parent_node_id() -> Option<String> {
    NODE_STACK
        .try_with(|stack| stack.borrow().last().cloned())
        .unwrap_or(None)
}

/// Push `node_id` onto the ambient stack. A no-op outside an
/// [`execution`] scope (nothing to track).
pub fn push_node(node_id: impl Into<String>) {
    let _ = NODE_STACK.try_with(|stack| stack.borrow_mut().push(node_id.into()));
}

/// Pop the most recently pushed node id. A no-op outside an [`execution`]
/// scope, and a no-op on an empty stack. Must be called on every exit
/// path, including failure, which [`crate::capture::CapturedCall`]
/// guarantees via a scope guard.
pub fn pop_node() {
    let _ = NODE_STACK.try_with(|stack| stack.borrow_mut().pop());
}

/// Whether an [`execution`] scope is currently active.
#[must_use]
pub fn in_execution_context() -> bool {
    EXECUTION_ID.try_with(|_| ()).is_ok()
}

/// RAII guard that pushes `node_id` on construction and pops it on drop,
/// so the stack stays balanced across early returns and panics alike.
pub struct NodeScope;

impl NodeScope {
    /// Push `node_id`, returning a guard that pops it on drop.
    #[must_use]
    pub fn enter(node_id: impl Into<String>) -> Self {
        push_node(node_id);
        NodeScope
    }
}

impl Drop for NodeScope {
    fn drop(&mut self) {
        pop_node();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn outside_context_synthesises_fresh_ids_each_call() {
        assert!(!in_execution_context());
        let a = current_execution_id();
        let b = current_execution_id();
        assert_ne!(a, b, "design note (d): no shared id outside a scope");
    }

    #[tokio::test]
    async fn execution_scope_shares_one_id_across_calls() {
        execution(|exec_id| async move {
            assert!(in_execution_context());
            assert_eq!(current_execution_id(), exec_id);
            assert_eq!(current_execution_id(), exec_id);
        })
        .await;
    }

    #[tokio::test]
    async fn parent_is_stack_top_and_balances_on_scope_drop() {
        execution(|_exec_id| async move {
            assert_eq!(current_parent_node_id(), None);
            {
                let _a = NodeScope::enter("a");
                assert_eq!(current_parent_node_id(), Some("a".to_string()));
                {
                    let _b = NodeScope::enter("b");
                    assert_eq!(current_parent_node_id(), Some("b".to_string()));
                }
                assert_eq!(current_parent_node_id(), Some("a".to_string()));
            }
            assert_eq!(current_parent_node_id(), None);
        })
        .await;
    }

    #[tokio::test]
    async fn node_popped_even_when_body_panics() {
        let result = std::panic::AssertUnwindSafe(execution(|_exec_id| async move {
            let _guard = NodeScope::enter("will-unwind");
            panic!("boom");
        }))
        .catch_unwind()
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn parallel_sub_tasks_get_independent_ambients() {
        let (left, right) = tokio::join!(
            execution(|exec_id| async move {
                let _g = NodeScope::enter("left-root");
                (exec_id, current_parent_node_id())
            }),
            execution(|exec_id| async move {
                let _g1 = NodeScope::enter("right-root");
                let _g2 = NodeScope::enter("right-child");
                (exec_id, current_parent_node_id())
            })
        );
        assert_ne!(left.0, right.0);
        assert_eq!(left.1, Some("left-root".to_string()));
        assert_eq!(right.1, Some("right-child".to_string()));
    }

    #[tokio::test]
    async fn ambient_survives_cooperative_suspension() {
        execution(|exec_id| async move {
            let _guard = NodeScope::enter("a");
            tokio::task::yield_now().await;
            assert_eq!(current_execution_id(), exec_id);
            assert_eq!(current_parent_node_id(), Some("a".to_string()));
        })
        .await;
    }
}
