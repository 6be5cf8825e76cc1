//! Typing reveal of agent replies: display only, the confirmed message list is never delayed.
//!
//! One animation runs at a time. Starting a new one aborts the previous task and bumps a
//! generation counter; frames are published only while their generation is current, so an
//! abandoned task still mid-poll on another worker cannot overwrite a newer frame.

use crate::api::Message;
use crate::config::TypingConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const PUNCTUATION: [char; 6] = ['.', ',', '!', '?', ';', ':'];

/// What a renderer should currently show for the animated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingFrame {
    pub message_id: i64,
    pub visible: String,
    pub done: bool,
}

/// One reveal step: show `text[..end]`, then wait `pause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealStep {
    pub end: usize,
    pub pause: Duration,
}

/// Split `text` into word-at-a-time steps. Whitespace sticks to the word before it;
/// words ending in punctuation pause longer.
pub fn reveal_steps(text: &str, config: &TypingConfig) -> Vec<RevealStep> {
    let word_pause = Duration::from_millis(config.word_delay_ms);
    let punctuation_pause = Duration::from_millis(config.punctuation_delay_ms);
    let mut steps: Vec<RevealStep> = Vec::new();
    let mut end = 0;
    for chunk in text.split_inclusive(char::is_whitespace) {
        end += chunk.len();
        let word = chunk.trim_end();
        if word.is_empty() {
            // whitespace run: extend the previous word; before any word it is carried into the first step
            if let Some(last) = steps.last_mut() {
                last.end = end;
            }
            continue;
        }
        let pause = if word.ends_with(&PUNCTUATION[..]) {
            punctuation_pause
        } else {
            word_pause
        };
        steps.push(RevealStep { end, pause });
    }
    steps
}

/// Publish `frame` unless `generation` has moved past `owner`.
///
/// The check runs under the channel's lock, and supersede/cancel bump the generation
/// before publishing, so a stale frame can never land after a newer one.
fn publish_frame(
    frames: &watch::Sender<Option<TypingFrame>>,
    generation: &AtomicU64,
    owner: u64,
    frame: TypingFrame,
) -> bool {
    frames.send_if_modified(|current| {
        if generation.load(Ordering::SeqCst) != owner {
            return false;
        }
        *current = Some(frame);
        true
    })
}

/// Owns the single running reveal task and publishes frames on a watch channel.
pub struct TypingAnimator {
    config: TypingConfig,
    frames: Arc<watch::Sender<Option<TypingFrame>>>,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TypingAnimator {
    pub fn new(config: TypingConfig) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            config,
            frames: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Receiver of frames; `None` means nothing is being revealed.
    pub fn subscribe(&self) -> watch::Receiver<Option<TypingFrame>> {
        self.frames.subscribe()
    }

    pub fn is_animating(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Start revealing `message`, abandoning any animation in progress.
    /// Must be called from within a tokio runtime.
    pub fn animate(&self, message: &Message) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        let owner = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = task.take() {
            old.abort();
        }
        let message_id = message.id;
        let text = message.text.clone();
        if !self.config.enabled {
            self.frames.send_replace(Some(TypingFrame {
                message_id,
                visible: text,
                done: true,
            }));
            return;
        }
        log::debug!("typing reveal started for message {}", message_id);
        let steps = reveal_steps(&text, &self.config);
        let frames = Arc::clone(&self.frames);
        let generation = Arc::clone(&self.generation);
        *task = Some(tokio::spawn(async move {
            for step in steps {
                let frame = TypingFrame {
                    message_id,
                    visible: text[..step.end].to_string(),
                    done: false,
                };
                if !publish_frame(&frames, &generation, owner, frame) {
                    return;
                }
                tokio::time::sleep(step.pause).await;
            }
            let last = TypingFrame {
                message_id,
                visible: text,
                done: true,
            };
            publish_frame(&frames, &generation, owner, last);
        }));
    }

    /// Abort the running animation (if any) and clear the published frame.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut task) = self.task.lock() {
            if let Some(old) = task.take() {
                old.abort();
            }
        }
        self.frames.send_replace(None);
    }
}

impl Drop for TypingAnimator {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut task) = self.task.lock() {
            if let Some(old) = task.take() {
                old.abort();
            }
        }
    }
}
