use super::{router, ApiError};
use crate::pipeline::Pipeline;
use crate::shutdown::{Lifecycle, ShutdownError, Stoppable};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ApiServer {
    pipeline: Arc<Pipeline>,
    lifecycle: Lifecycle,
}

impl ApiServer {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            lifecycle: Lifecycle::new("api"),
        }
    }

    /// Bind `addr` and serve in the background. Returns the bound address.
    pub async fn start(&self, addr: &str) -> Result<SocketAddr, ApiError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ApiError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        if !self.lifecycle.begin() {
            return Err(ApiError::AlreadyStarted);
        }

        let app = router(self.pipeline.clone());
        let token = self.lifecycle.token();
        self.lifecycle.spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        });

        tracing::info!("  ✅ API server listening on {}", local_addr);
        Ok(local_addr)
    }
}

#[async_trait]
impl Stoppable for ApiServer {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    async fn stop(&self, deadline: Duration) -> Result<(), ShutdownError> {
        self.lifecycle.stop(deadline).await
    }
}
