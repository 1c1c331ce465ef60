#![allow(dead_code)]

use async_trait::async_trait;
use mailflow_engine::{
    config::ExecutionConfig,
    store::{create_store, ContactStore, DatabaseConfig},
    template::TemplateLoader,
    transport::{DeliveryReport, Messenger, OutboundEmail, Transport},
    workflow::{
        Collaborators, Engine, EventState, ExecutionState, SenderIdentity, StepExecutor, WorkflowId,
    },
    Error, Result,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Transport that remembers every accepted email.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(OutboundEmail, Instant)>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingTransport {
    /// Make every send take `delay` before it is accepted.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.to.clone())
            .collect()
    }

    pub fn sent_at(&self, to: &str) -> Option<Instant> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .find(|(m, _)| m.to == to)
            .map(|(_, at)| *at)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_email(&self, message: OutboundEmail) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("rejected mail to {}", message.to)));
        }
        self.sent.lock().unwrap().push((message, Instant::now()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn broadcast(&self, message: &str) -> Result<Vec<DeliveryReport>> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(vec![DeliveryReport::delivered("user-1")])
    }
}

pub struct StaticTemplates;

#[async_trait]
impl TemplateLoader for StaticTemplates {
    async fn load(&self, name: &str) -> Result<String> {
        Ok(format!("<p>{}</p>", name))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(vec!["welcome".to_string()])
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub transport: Arc<RecordingTransport>,
    pub messenger: Arc<RecordingMessenger>,
    pub contacts: Arc<dyn ContactStore>,
}

pub async fn harness(options: ExecutionConfig) -> Harness {
    let contacts = create_store(&DatabaseConfig::in_memory())
        .await
        .expect("Failed to create store");
    contacts.init().await.expect("Failed to initialize store");

    let transport = Arc::new(RecordingTransport::default());
    let messenger = Arc::new(RecordingMessenger::default());
    let executor = Arc::new(StepExecutor::new(
        Collaborators {
            transport: transport.clone(),
            messenger: messenger.clone(),
            contacts: contacts.clone(),
            templates: Arc::new(StaticTemplates),
        },
        Arc::new(EventState::new()),
        options,
    ));

    let engine = Arc::new(Engine::new(executor));
    engine.clone().start().await;

    Harness {
        engine,
        transport,
        messenger,
        contacts,
    }
}

pub fn sender() -> SenderIdentity {
    SenderIdentity {
        name: "Sam Sender".to_string(),
        email: "sam@example.com".to_string(),
    }
}

/// Poll until the instance reaches `state` or two seconds pass.
pub async fn wait_for_state(engine: &Engine, id: WorkflowId, state: ExecutionState) -> ExecutionState {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let current = engine.snapshot(id).await.expect("workflow exists").state;
        if current == state || Instant::now() >= deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
