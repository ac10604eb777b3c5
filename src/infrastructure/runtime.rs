use std::{future::Future, io, thread};

use tokio::runtime::{Builder, Runtime};

/// Runs `task` on a single-threaded tokio runtime owned by a dedicated thread.
///
/// Everything spawned from inside `task` with `tokio::spawn` shares that one
/// thread, so tasks only interleave at their await points.
pub fn spawn_cooperative<F, Fut>(name: &str, task: F) -> io::Result<thread::JoinHandle<()>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(
                    target: "lifecycle",
                    thread = %thread_name,
                    error = %err,
                    "failed to build cooperative runtime"
                );
                return;
            }
        };
        runtime.block_on(task());
    })
}

/// Multi-threaded runtime for the request-serving boundary.
pub fn server_runtime() -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .enable_all()
        .thread_name("webhook-server")
        .build()
}
