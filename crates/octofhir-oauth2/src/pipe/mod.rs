//! Ordered request pipeline.
//!
//! A [`Pipe`] runs its stages in the order they were added. Each stage sees
//! the request, may answer it directly, or hands it to the rest of the
//! pipe through [`Next::run`]. The terminal [`Handler`] is the endpoint.
//!
//! ```ignore
//! let pipe = Pipe::new(Arc::new(token_endpoint))
//!     .with(Arc::new(OAuth2ResponseMiddleware::new("token")))
//!     .with(Arc::new(FormBodyParserMiddleware))
//!     .with(Arc::new(GrantTypeMiddleware::new(grant_types)));
//! let response = pipe.dispatch(request).await;
//! ```

pub mod stages;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EndpointError;
use crate::http::{HttpRequest, HttpResponse, error_response};

pub use stages::{
    AuthenticatedResourceServer, ClientAuthenticationMiddleware, FormBodyParserMiddleware,
    GrantTypeMiddleware, OAuth2ResponseMiddleware, ResourceServerAuthenticationMiddleware,
};

/// Result of a stage or endpoint.
pub type PipeResult = Result<HttpResponse, EndpointError>;

/// The terminal step of a pipe.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produces the response.
    async fn handle(&self, request: HttpRequest) -> PipeResult;
}

/// A pipe stage.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Processes the request, usually by calling `next.run(request)`.
    async fn process(&self, request: HttpRequest, next: Next<'_>) -> PipeResult;
}

/// The remainder of a pipe.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl Next<'_> {
    /// Passes the request to the next stage, or to the handler.
    pub async fn run(self, request: HttpRequest) -> PipeResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage
                    .process(
                        request,
                        Next {
                            stages: rest,
                            handler: self.handler,
                        },
                    )
                    .await
            }
            None => self.handler.handle(request).await,
        }
    }
}

/// Stages in front of a handler.
#[derive(Clone)]
pub struct Pipe {
    stages: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn Handler>,
}

impl Pipe {
    #[must_use]
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            stages: Vec::new(),
            handler,
        }
    }

    /// Appends a stage. The first stage added is the outermost.
    #[must_use]
    pub fn with(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Runs the request through every stage.
    ///
    /// # Errors
    ///
    /// Returns the error no stage turned into a response.
    pub async fn process(&self, request: HttpRequest) -> PipeResult {
        Next {
            stages: &self.stages,
            handler: self.handler.as_ref(),
        }
        .run(request)
        .await
    }

    /// Runs the request and renders any error that escaped the stages.
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        match self.process(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, "Error escaped the pipe");
                error_response(err.auth_error(), "oauth2")
            }
        }
    }
}

#[async_trait]
impl Handler for Pipe {
    async fn handle(&self, request: HttpRequest) -> PipeResult {
        self.process(request).await
    }
}
