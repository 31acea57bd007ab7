//! End-to-end runs over localhost TCP.

mod test_harness;

use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dispatch_lite::clock::TokioSleep;
use dispatch_lite::config::{AuthConfig, ControllerConfig, WorkerConfig};
use dispatch_lite::controller::{run_controller, Controller};
use dispatch_lite::error::DispatchError;
use dispatch_lite::protocol::{WorkerId, WorkerMessage};
use dispatch_lite::scheduler::VecSink;
use dispatch_lite::transport::{Link, Router, TcpLink, Transport};
use dispatch_lite::worker::{run_worker, AgentSettings, Squarer, WorkerAgent};
use test_harness::*;

fn local_config(total_jobs: u64, max_jobs_per_worker: usize) -> ControllerConfig {
    ControllerConfig::new("127.0.0.1:0".parse().unwrap())
        .with_total_jobs(total_jobs)
        .with_max_jobs_per_worker(max_jobs_per_worker)
        .with_auth(AuthConfig::enforced(test_fingerprint()))
}

fn spawn_tcp_agent(
    addr: SocketAddr,
    identity: &str,
    fingerprint: dispatch_lite::fingerprint::Fingerprint,
    shutdown: &CancellationToken,
) -> tokio::task::JoinHandle<Result<dispatch_lite::worker::AgentStats, DispatchError>> {
    let token = shutdown.clone();
    let identity = WorkerId::from(identity);
    tokio::spawn(async move {
        let link = TcpLink::connect(addr.to_string(), identity).await?;
        let mut agent = WorkerAgent::new(
            link,
            Squarer::new(),
            TokioSleep,
            Some(fingerprint),
            AgentSettings::default(),
        );
        agent.run(&token).await
    })
}

#[tokio::test]
async fn test_tcp_workers_complete_every_job() {
    let config = local_config(30, 5);
    let mut controller = Controller::bind(&config, VecSink::new()).await.unwrap();
    let addr = controller.local_addr().unwrap();

    let agents_shutdown = CancellationToken::new();
    let agents: Vec<_> = ["w-1", "w-2", "w-3"]
        .into_iter()
        .map(|name| spawn_tcp_agent(addr, name, test_fingerprint(), &agents_shutdown))
        .collect();

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        controller.run(&CancellationToken::new()),
    )
    .await
    .expect("controller did not settle");
    agents_shutdown.cancel();

    assert!(!summary.interrupted);
    assert_eq!(summary.minted, 30);
    assert_eq!(summary.stats.completed, 30);
    assert_eq!(summary.still_assigned, 0);
    assert_eq!(summary.still_requeued, 0);

    let sink = controller.into_sink();
    assert_eq!(sink.len(), 30);
    for completion in &sink.completions {
        assert_eq!(
            completion.result,
            serde_json::Value::from(square(&completion.job.payload))
        );
    }

    let mut total = 0;
    for agent in agents {
        total += agent.await.unwrap().unwrap().jobs_completed;
    }
    assert_eq!(total, 30);
}

#[tokio::test]
async fn test_impostor_gets_no_work() {
    let config = local_config(10, 5);
    let mut controller = Controller::bind(&config, VecSink::new()).await.unwrap();
    let addr = controller.local_addr().unwrap();

    let agents_shutdown = CancellationToken::new();
    let impostor = spawn_tcp_agent(addr, "impostor", wrong_fingerprint(), &agents_shutdown);
    let honest = spawn_tcp_agent(addr, "honest", test_fingerprint(), &agents_shutdown);

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        controller.run(&CancellationToken::new()),
    )
    .await
    .expect("controller did not settle");
    agents_shutdown.cancel();

    assert_eq!(summary.stats.completed, 10);
    let sink = controller.into_sink();
    assert!(sink
        .completions
        .iter()
        .all(|c| c.worker_id == WorkerId::from("honest")));

    assert_eq!(impostor.await.unwrap().unwrap().jobs_completed, 0);
    assert_eq!(honest.await.unwrap().unwrap().jobs_completed, 10);
}

#[tokio::test]
async fn test_run_worker_against_run_controller() {
    // grab a free port, then hand it to the controller
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let config = ControllerConfig::new(addr)
        .with_total_jobs(12)
        .with_max_jobs_per_worker(4)
        .with_auth(AuthConfig::enforced(test_fingerprint()));

    let controller = tokio::spawn(run_controller(
        config,
        VecSink::new(),
        CancellationToken::new(),
    ));

    let workers_shutdown = CancellationToken::new();
    let worker_config = WorkerConfig {
        controller_addr: addr.to_string(),
        identity: Some("runner".to_string()),
        backoff_ms: 50,
        fingerprint: Some(test_fingerprint()),
        jitter: false,
        ..WorkerConfig::default()
    };
    let worker = tokio::spawn(run_worker(worker_config, workers_shutdown.clone()));

    let summary = tokio::time::timeout(Duration::from_secs(30), controller)
        .await
        .expect("controller did not settle")
        .unwrap()
        .unwrap();
    workers_shutdown.cancel();

    assert!(!summary.interrupted);
    assert_eq!(summary.stats.completed, 12);
    assert_eq!(worker.await.unwrap().unwrap().jobs_completed, 12);
}

#[tokio::test]
async fn test_tcp_reconnect_keeps_goodbye_ahead_of_new_session() {
    let wait = Duration::from_secs(5);
    let mut router = Router::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = router.local_addr().unwrap();
    let fp = test_fingerprint();
    let hello = WorkerMessage::auth(Some(&fp));
    let bye = WorkerMessage::disconnect(Some(&fp));

    let mut link = TcpLink::connect(addr.to_string(), WorkerId::from("hopper"))
        .await
        .unwrap();
    link.send(hello.encode().unwrap()).await.unwrap();
    assert_eq!(next_message(&mut router, wait).await.unwrap().1, hello);

    for round in 0..20 {
        link.send(bye.encode().unwrap()).await.unwrap();
        link.reconnect().await.unwrap();
        link.send(hello.encode().unwrap()).await.unwrap();

        let (_, first) = next_message(&mut router, wait).await.unwrap();
        assert_eq!(first, bye, "round {round}");
        let (_, second) = next_message(&mut router, wait).await.unwrap();
        assert_eq!(second, hello, "round {round}");
    }

    // the newest connection is the one routed to
    router.send(&WorkerId::from("hopper"), pong_frame()).unwrap();
    assert_eq!(link.recv(wait).await.unwrap(), Some(pong_frame()));
}

#[tokio::test]
async fn test_bind_rejects_zero_capacity() {
    let config = local_config(1, 0);
    match Controller::bind(&config, VecSink::new()).await {
        Err(DispatchError::Config(msg)) => assert!(msg.contains("max_jobs_per_worker")),
        Err(other) => panic!("expected a config error, got {other}"),
        Ok(_) => panic!("zero capacity was accepted"),
    }
}
