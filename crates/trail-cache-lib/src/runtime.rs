//! Task spawning over tokio
//!
//! Fetch tasks are spawned through here so they show up as their own scope in profiling
//! traces when the `profiling` feature is enabled.

/// Spawn an async task on the current tokio runtime.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    #[cfg(feature = "profiling")]
    {
        tokio::spawn(async move {
            profiling::scope!(
                "runtime::spawn",
                format!("task_type={}", std::any::type_name::<F>()).as_str()
            );
            future.await
        })
    }
    #[cfg(not(feature = "profiling"))]
    {
        tokio::spawn(future)
    }
}

/// Check if we're running inside a tokio runtime context.
pub fn in_runtime_context() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_runtime() {
        assert!(!in_runtime_context());
    }

    #[tokio::test]
    async fn test_spawn_inside_runtime() {
        assert!(in_runtime_context());
        let handle = spawn(async { 21 * 2 });
        assert_eq!(handle.await.unwrap(), 42);
    }
}
