use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aotserver_cache::{CacheManifest, ClassSpec, ManifestIndex, MethodSpec, Resolver};
use aotserver_dispatch::{
    CompilationStrategy, CompileRequest, CompletionStatus, DefaultStrategy, DispatchMetrics,
    Dispatcher, OptLevel, PlanPool, StubCodeGenerator, WorkerPoolEngine,
};
use aotserver_wire::{WireError, client, serve, serve_with_read_timeout};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    addr: SocketAddr,
    index: ManifestIndex,
    pool: PlanPool,
    metrics: Arc<DispatchMetrics>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        Self::launch(None).await
    }

    async fn start_with_read_timeout(read_timeout: Duration) -> Self {
        Self::launch(Some(read_timeout)).await
    }

    async fn launch(read_timeout: Option<Duration>) -> Self {
        let manifest = CacheManifest {
            loaders: vec!["app".to_string()],
            classes: vec![
                ClassSpec::new("demo/Service", "app")
                    .with_method(MethodSpec::new("handle", "(J)V"))
                    .with_method(MethodSpec::new("warmup", "()V").compiled()),
            ],
        };
        let built = manifest.build().unwrap();
        let cache = Arc::new(built.cache);
        let metrics = Arc::new(DispatchMetrics::new());
        let pool = PlanPool::with_capacity(4);
        let engine = WorkerPoolEngine::start(
            1,
            8,
            Arc::clone(&cache),
            Arc::new(StubCodeGenerator),
            Arc::clone(&metrics),
        )
        .unwrap();
        let strategy: Arc<dyn CompilationStrategy> =
            Arc::new(DefaultStrategy::new(pool.clone(), OptLevel::Scorching));
        let dispatcher = Dispatcher::new(
            Resolver::new(cache, Arc::new(built.classes)),
            strategy,
            Arc::new(engine),
            Arc::clone(&metrics),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = match read_timeout {
            Some(read_timeout) => tokio::spawn(serve_with_read_timeout(
                listener,
                dispatcher,
                shutdown.clone(),
                read_timeout,
            )),
            None => tokio::spawn(serve(listener, dispatcher, shutdown.clone())),
        };

        Self {
            addr,
            index: built.index,
            pool,
            metrics,
            shutdown,
            server,
        }
    }

    fn request(&self, method: &str) -> CompileRequest {
        let (class, method) = self.index.lookup("demo/Service", method).unwrap();
        CompileRequest::new(class, method, OptLevel::Hot)
    }

    async fn compile(&self, request: CompileRequest) -> Result<CompletionStatus, WireError> {
        let addr = self.addr;
        tokio::task::spawn_blocking(move || {
            client::compile(addr, &request, Some(Duration::from_secs(10)))
        })
        .await
        .unwrap()
    }

    /// Send raw bytes, half-close, and return everything the server wrote.
    async fn send_raw(&self, bytes: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(bytes).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        reply
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.unwrap();
    }
}

#[tokio::test]
async fn compiles_then_reports_not_needed() {
    let harness = Harness::start().await;

    let status = harness.compile(harness.request("handle")).await.unwrap();
    assert_eq!(status, CompletionStatus::Success);

    let status = harness.compile(harness.request("handle")).await.unwrap();
    assert_eq!(status, CompletionStatus::NotNeeded);

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.requests, 2);
    assert_eq!(snapshot.compile_successes, 1);
    assert_eq!(snapshot.skipped_already_compiled, 1);
    assert_eq!(harness.pool.allocated(), harness.pool.released());
    harness.stop().await;
}

#[tokio::test]
async fn seeded_code_is_not_needed() {
    let harness = Harness::start().await;
    let status = harness.compile(harness.request("warmup")).await.unwrap();
    assert_eq!(status, CompletionStatus::NotNeeded);
    assert_eq!(harness.pool.allocated(), 0);
    harness.stop().await;
}

#[tokio::test]
async fn uncached_class_fails() {
    let harness = Harness::start().await;
    let mut request = harness.request("handle");
    request.class_offset = request.method_offset;

    let status = harness.compile(request).await.unwrap();
    assert_eq!(status, CompletionStatus::Failure);
    assert_eq!(harness.metrics.snapshot().rejected_class_not_cached, 1);
    harness.stop().await;
}

#[tokio::test]
async fn malformed_request_is_cancelled_without_status() {
    let harness = Harness::start().await;

    // Frame with an unknown tag.
    let reply = harness.send_raw(&[0, 0, 0, 1, 0x7f]).await;
    assert!(reply.is_empty());

    // Frame cut short by the client closing its side.
    let reply = harness.send_raw(&[0, 0, 0, 42, 0x01, 0, 0]).await;
    assert!(reply.is_empty());

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.cancelled, 2);
    assert_eq!(snapshot.requests, 0);
    assert_eq!(harness.pool.allocated(), 0);
    harness.stop().await;
}

#[tokio::test]
async fn status_frame_sent_as_request_is_cancelled() {
    let harness = Harness::start().await;
    let addr = harness.addr;
    let result = tokio::task::spawn_blocking(move || {
        let mut stream = std::net::TcpStream::connect(addr)?;
        std::io::Write::write_all(&mut stream, &[0, 0, 0, 2, 0x02, 0])?;
        let mut reply = Vec::new();
        std::io::Read::read_to_end(&mut stream, &mut reply)?;
        Ok::<_, std::io::Error>(reply)
    })
    .await
    .unwrap()
    .unwrap();

    // A completion status is not a request.
    assert!(result.is_empty());
    assert_eq!(harness.metrics.snapshot().cancelled, 1);
    harness.stop().await;
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let harness = Harness::start().await;
    let addr = harness.addr;
    harness.stop().await;

    let result = tokio::task::spawn_blocking(move || {
        client::compile(
            addr,
            &CompileRequest::new(
                aotserver_cache::CacheOffset(16),
                aotserver_cache::CacheOffset(32),
                OptLevel::Cold,
            ),
            Some(Duration::from_secs(1)),
        )
    })
    .await
    .unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn idle_client_is_cancelled_after_read_timeout() {
    let harness = Harness::start_with_read_timeout(Duration::from_millis(200)).await;

    let mut idle = TcpStream::connect(harness.addr).await.unwrap();
    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), idle.read_to_end(&mut reply))
        .await
        .expect("server closes the idle stream")
        .unwrap();
    assert!(reply.is_empty());

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.cancelled, 1);
    assert_eq!(snapshot.requests, 0);
    harness.stop().await;
}

#[tokio::test]
async fn shutdown_does_not_wait_for_idle_clients() {
    let harness = Harness::start().await;
    let metrics = Arc::clone(&harness.metrics);

    let mut idle = TcpStream::connect(harness.addr).await.unwrap();
    // Served after the idle connection was accepted.
    let status = harness.compile(harness.request("handle")).await.unwrap();
    assert_eq!(status, CompletionStatus::Success);

    tokio::time::timeout(Duration::from_secs(3), harness.stop())
        .await
        .expect("server stops while a client is idle");

    let mut reply = Vec::new();
    idle.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());
    assert_eq!(metrics.snapshot().cancelled, 1);
}
