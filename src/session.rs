use chrono::Local;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::frame_source::ImageReference;
use crate::radar::RadarDot;
use crate::relay::AnalysisResult;

pub const MAX_NOTICES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub text: String,
    pub time: String,
    pub audio_url: Option<String>,
    pub radar_dots: Vec<RadarDot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub id: Uuid,
    pub text: String,
    pub time: String,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub radar_dots: Vec<RadarDot>,
    pub current_frame: Option<ImageReference>,
    /// Bumped on every `set_frame`
    pub frame_seq: u64,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Default)]
struct Session {
    messages: VecDeque<Message>,
    radar_dots: Vec<RadarDot>,
    current_frame: Option<ImageReference>,
    frame_seq: u64,
    notices: VecDeque<Notice>,
}

/// Shared handle to the session. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<Session>>,
}

fn clock() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_result(&self, result: AnalysisResult) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            text: result.text,
            time: clock(),
            audio_url: result.audio,
            radar_dots: result.radar_dots.clone(),
        };

        let mut session = self.inner.write();
        session.messages.push_front(message.clone());
        session.radar_dots = result.radar_dots;

        debug!(
            "Session now holds {} message(s), {} radar dot(s)",
            session.messages.len(),
            session.radar_dots.len()
        );
        message
    }

    pub fn set_frame(&self, frame: ImageReference) {
        let mut session = self.inner.write();
        session.current_frame = Some(frame);
        session.frame_seq += 1;
    }

    pub fn report_warning(&self, text: impl Into<String>) {
        let notice = Notice {
            id: Uuid::new_v4(),
            text: text.into(),
            time: clock(),
        };
        warn!("{}", notice.text);

        let mut session = self.inner.write();
        session.notices.push_front(notice);
        session.notices.truncate(MAX_NOTICES);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.read().messages.iter().cloned().collect()
    }

    pub fn radar_dots(&self) -> Vec<RadarDot> {
        self.inner.read().radar_dots.clone()
    }

    pub fn current_frame(&self) -> Option<ImageReference> {
        self.inner.read().current_frame.clone()
    }

    pub fn message_audio(&self, id: Uuid) -> Option<String> {
        self.inner
            .read()
            .messages
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.audio_url.clone())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_since(None)
    }

    /// Like `snapshot`, but only carries messages newer than `since`. An
    /// unknown cursor yields the whole log.
    pub fn snapshot_since(&self, since: Option<Uuid>) -> SessionSnapshot {
        let session = self.inner.read();
        SessionSnapshot {
            messages: session
                .messages
                .iter()
                .take_while(|m| Some(m.id) != since)
                .cloned()
                .collect(),
            radar_dots: session.radar_dots.clone(),
            current_frame: session.current_frame.clone(),
            frame_seq: session.frame_seq,
            notices: session.notices.iter().cloned().collect(),
        }
    }
}
