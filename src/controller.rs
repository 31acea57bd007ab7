use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::clock::TokioSleep;
use crate::config::ControllerConfig;
use crate::error::Result;
use crate::scheduler::dispatcher::{Dispatcher, RunSummary};
use crate::scheduler::handler::{AuthMode, ProtocolHandler};
use crate::scheduler::sink::ResultSink;
use crate::scheduler::source::{numbers, JobSource};
use crate::transport::Router;

/// A dispatcher bound to a TCP endpoint and fed the reference workload.
pub struct Controller<S> {
    dispatcher: Dispatcher<Router, S, TokioSleep>,
    local_addr: Option<SocketAddr>,
}

impl<S: ResultSink> Controller<S> {
    /// Resolve authentication, bind the listen address and build the
    /// dispatcher. Nothing is dispatched until [`run`](Self::run).
    pub async fn bind(config: &ControllerConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let auth = config.auth.resolve()?;
        match &auth {
            AuthMode::Enforced(fp) => {
                tracing::info!(fingerprint = %fp, "Worker authentication enabled");
            }
            AuthMode::Disabled => {
                tracing::warn!("Worker authentication disabled, accepting any fingerprint");
            }
        }

        let router = Router::bind(config.listen_addr).await?;
        let local_addr = router.local_addr();
        let source = JobSource::new(numbers(config.total_jobs));
        let dispatcher = Dispatcher::new(
            router,
            source,
            sink,
            TokioSleep,
            ProtocolHandler::new(auth),
            config,
        );
        Ok(Self {
            dispatcher,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn dispatcher(&self) -> &Dispatcher<Router, S, TokioSleep> {
        &self.dispatcher
    }

    pub async fn run(&mut self, shutdown: &CancellationToken) -> RunSummary {
        self.dispatcher.run(shutdown).await
    }

    pub fn into_sink(self) -> S {
        self.dispatcher.into_sink()
    }
}

/// Bind, dispatch the whole workload, and return the summary.
pub async fn run_controller<S: ResultSink>(
    config: ControllerConfig,
    sink: S,
    shutdown: CancellationToken,
) -> Result<RunSummary> {
    let mut controller = Controller::bind(&config, sink).await?;
    Ok(controller.run(&shutdown).await)
}
