use std::collections::VecDeque;

/// Bounded history of previously emitted items, oldest evicted first.
#[derive(Debug, Clone)]
pub struct RecentWindow {
    items: VecDeque<String>,
    capacity: usize,
}

impl RecentWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item.into());
    }

    /// Case- and whitespace-insensitive membership.
    pub fn contains(&self, item: &str) -> bool {
        let needle = normalize(item);
        self.items.iter().any(|existing| normalize(existing) == needle)
    }

    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.items.len() > capacity {
            self.items.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Prompt block listing the history, or an empty string when there is none.
    pub fn as_prompt_context(&self, heading: &str) -> String {
        if self.items.is_empty() {
            return String::new();
        }
        let mut block = format!("\n\n{heading}\n");
        for item in &self.items {
            block.push_str("- ");
            block.push_str(item);
            block.push('\n');
        }
        block
    }
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
