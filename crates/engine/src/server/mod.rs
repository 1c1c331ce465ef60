mod routes;
mod webhook;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{store::ContactStore, template::TemplateLoader, workflow::Engine};

pub use webhook::{EmailEventPayload, EventData};

pub struct Server {
    engine: Arc<Engine>,
    contacts: Arc<dyn ContactStore>,
    templates: Arc<dyn TemplateLoader>,
}

impl Server {
    pub fn new(
        engine: Arc<Engine>,
        contacts: Arc<dyn ContactStore>,
        templates: Arc<dyn TemplateLoader>,
    ) -> Self {
        Self {
            engine,
            contacts,
            templates,
        }
    }

    pub fn build_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/health", get(routes::health))
            .route("/api/emailWorkflow", post(routes::submit_workflow))
            .route("/api/workflows/{id}", get(routes::get_workflow))
            .route("/api/workflows/{id}/retry", post(routes::retry_workflow))
            .route("/api/templates", get(routes::list_templates))
            .route("/api/createContact", post(routes::create_contact))
            .route("/webhook/emailEvent", post(webhook::email_event))
            .route("/metrics", get(routes::metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::store::MockContactStore;
    use crate::template::MockTemplateLoader;
    use crate::transport::{MockMessenger, MockTransport};
    use crate::workflow::{Collaborators, EventState, StepExecutor};
    use axum::body::Body;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router(templates: MockTemplateLoader) -> Router {
        let templates: Arc<dyn TemplateLoader> = Arc::new(templates);
        let contacts: Arc<dyn ContactStore> = Arc::new(MockContactStore::new());
        let executor = StepExecutor::new(
            Collaborators {
                transport: Arc::new(MockTransport::new()),
                messenger: Arc::new(MockMessenger::new()),
                contacts: contacts.clone(),
                templates: templates.clone(),
            },
            Arc::new(EventState::new()),
            ExecutionConfig::default(),
        );
        let engine = Arc::new(Engine::new(Arc::new(executor)));
        Server::new(engine, contacts, templates).build_router()
    }

    #[tokio::test]
    async fn test_health() {
        let response = tokio_test::assert_ok!(
            router(MockTemplateLoader::new())
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
        );
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_template_errors_are_server_errors() {
        let mut templates = MockTemplateLoader::new();
        templates
            .expect_list()
            .returning(|| Err(crate::Error::Io(std::io::Error::other("disk gone"))));

        let response = tokio_test::assert_ok!(
            router(templates)
                .oneshot(Request::get("/api/templates").body(Body::empty()).unwrap())
                .await
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
