//! Application state management

use cadence_core::{
    AudioOutput, ChunkOrchestrator, PcmFormat, PlaybackSession, ResponseGenerator, SpeechConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChunkOrchestrator>,
    pub generator: Arc<ResponseGenerator>,
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<PlaybackSession>>>>,
    output: Arc<dyn AudioOutput>,
    format: PcmFormat,
    completion_grace: Duration,
}

impl AppState {
    pub fn new(
        orchestrator: ChunkOrchestrator,
        generator: ResponseGenerator,
        output: Arc<dyn AudioOutput>,
        config: &SpeechConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            generator: Arc::new(generator),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            output,
            format: PcmFormat::mono(config.sample_rate),
            completion_grace: config.completion_grace(),
        }
    }

    /// Create and register a new playback session on the shared output.
    pub async fn create_session(&self) -> (Uuid, Arc<PlaybackSession>) {
        let id = Uuid::new_v4();
        let session = Arc::new(
            PlaybackSession::new(Arc::clone(&self.output), self.format)
                .with_completion_grace(self.completion_grace),
        );
        self.sessions.write().await.insert(id, Arc::clone(&session));
        (id, session)
    }

    pub async fn session(&self, id: &Uuid) -> Option<Arc<PlaybackSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove_session(&self, id: &Uuid) -> Option<Arc<PlaybackSession>> {
        self.sessions.write().await.remove(id)
    }
}
