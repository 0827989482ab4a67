use std::collections::VecDeque;

use rand::rngs::SmallRng;
use rand::Rng;

use super::{Bot, MESSAGE_HISTORY};
use crate::config::BOARD_SIZE;
use crate::domain::{Arrangement, Step};

/// Submits a fixed arrangement and picks every step uniformly at random.
pub struct RandomStepBot {
    name: String,
    arrangement: Arrangement,
    rng: SmallRng,
    messages: VecDeque<String>,
}

impl RandomStepBot {
    pub fn new(name: impl Into<String>, arrangement: Arrangement, rng: SmallRng) -> Self {
        Self {
            name: name.into(),
            arrangement,
            rng,
            messages: VecDeque::new(),
        }
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.back().map(String::as_str)
    }
}

#[async_trait::async_trait]
impl Bot for RandomStepBot {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn provide_arrangement(&mut self) -> anyhow::Result<Arrangement> {
        Ok(self.arrangement.clone())
    }

    async fn provide_step(&mut self) -> anyhow::Result<Step> {
        let x = self.rng.random_range(0..BOARD_SIZE) as u8;
        let y = self.rng.random_range(0..BOARD_SIZE) as u8;
        Ok(Step::new(x, y))
    }

    fn on_message(&mut self, text: &str) {
        log::debug!("[{}] message: {}", self.name, text);
        if self.messages.len() == MESSAGE_HISTORY {
            self.messages.pop_front();
        }
        self.messages.push_back(text.to_string());
    }
}
