use std::collections::VecDeque;

use super::{Bot, MESSAGE_HISTORY};
use crate::domain::{Arrangement, Step};

/// Sample 10×10 layout shared by the reference clients.
pub fn sample_arrangement() -> Arrangement {
    Arrangement::from_rows([
        [1, 0, 0, 1, 0, 0, 0, 0, 1, 1],
        [1, 0, 0, 1, 0, 0, 0, 0, 0, 0],
        [0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        [0, 1, 0, 0, 0, 0, 1, 1, 0, 0],
        [0, 1, 0, 0, 0, 0, 0, 0, 0, 0],
        [0, 0, 0, 0, 0, 0, 0, 1, 1, 0],
        [0, 0, 0, 1, 1, 0, 0, 0, 0, 0],
        [0, 1, 0, 0, 0, 0, 0, 0, 0, 0],
        [0, 1, 0, 1, 0, 1, 0, 0, 0, 0],
        [0, 0, 0, 1, 0, 1, 0, 0, 0, 0],
    ])
}

/// Bot answering every request with constant data. For demos and tests.
pub struct FixtureBot {
    name: String,
    arrangement: Arrangement,
    step: Step,
    messages: VecDeque<String>,
    arrangements_served: usize,
    steps_served: usize,
}

impl FixtureBot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arrangement: sample_arrangement(),
            step: Step::new(1, 0),
            messages: VecDeque::new(),
            arrangements_served: 0,
            steps_served: 0,
        }
    }

    pub fn with_arrangement(mut self, arrangement: Arrangement) -> Self {
        self.arrangement = arrangement;
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.step = step;
        self
    }

    /// Messages received from the hub, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    pub fn arrangements_served(&self) -> usize {
        self.arrangements_served
    }

    pub fn steps_served(&self) -> usize {
        self.steps_served
    }
}

#[async_trait::async_trait]
impl Bot for FixtureBot {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn provide_arrangement(&mut self) -> anyhow::Result<Arrangement> {
        self.arrangements_served += 1;
        Ok(self.arrangement.clone())
    }

    async fn provide_step(&mut self) -> anyhow::Result<Step> {
        self.steps_served += 1;
        Ok(self.step)
    }

    fn on_message(&mut self, text: &str) {
        if self.messages.len() == MESSAGE_HISTORY {
            self.messages.pop_front();
        }
        self.messages.push_back(text.to_string());
    }
}
