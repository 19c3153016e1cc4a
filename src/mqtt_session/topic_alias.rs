// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! MQTT v5.0 topic alias bookkeeping.
//!
//! Alias state is scoped to a single connection: the send-side map is created
//! fresh from each CONNACK that advertises `topic_alias_maximum > 0` and
//! dropped on disconnect; the receive-side map lives as long as the client
//! advertises a non-zero maximum of its own.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicAliasError {
    /// Alias is 0 or above the negotiated maximum.
    OutOfRange { alias: u16, max: u16 },
    /// A publish referenced an alias with no registered topic.
    Unresolved(u16),
    /// A publish carried neither a topic nor an alias.
    Missing,
    /// Aliases were used while the peer advertised a maximum of 0.
    NotEnabled,
}

impl std::fmt::Display for TopicAliasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicAliasError::OutOfRange { alias, max } => {
                write!(f, "Topic alias {alias} outside 1..={max}")
            }
            TopicAliasError::Unresolved(alias) => {
                write!(f, "Unregistered topic alias {alias}")
            }
            TopicAliasError::Missing => write!(f, "Publish carries no topic and no alias"),
            TopicAliasError::NotEnabled => write!(f, "Topic aliases are not negotiated"),
        }
    }
}

impl std::error::Error for TopicAliasError {}

/// Send-side alias map: bidirectional topic <-> alias with LRU recency.
#[derive(Debug)]
pub struct TopicAliasSend {
    max: u16,
    by_alias: HashMap<u16, String>,
    by_topic: HashMap<String, u16>,
    /// Aliases ordered most-recently-used first.
    recency: VecDeque<u16>,
}

impl TopicAliasSend {
    /// `max` is the broker-advertised maximum, at least 1.
    pub fn new(max: u16) -> Self {
        Self {
            max,
            by_alias: HashMap::new(),
            by_topic: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    fn check(&self, alias: u16) -> Result<(), TopicAliasError> {
        if alias == 0 || alias > self.max {
            return Err(TopicAliasError::OutOfRange {
                alias,
                max: self.max,
            });
        }
        Ok(())
    }

    fn touch(&mut self, alias: u16) {
        if let Some(pos) = self.recency.iter().position(|&a| a == alias) {
            self.recency.remove(pos);
        }
        self.recency.push_front(alias);
    }

    /// Map `topic` to `alias`, displacing whatever either side was bound to.
    pub fn put(&mut self, topic: &str, alias: u16) -> Result<(), TopicAliasError> {
        self.check(alias)?;
        if let Some(old_topic) = self.by_alias.insert(alias, topic.to_owned()) {
            self.by_topic.remove(&old_topic);
        }
        if let Some(old_alias) = self.by_topic.insert(topic.to_owned(), alias) {
            if old_alias != alias {
                self.by_alias.remove(&old_alias);
                if let Some(pos) = self.recency.iter().position(|&a| a == old_alias) {
                    self.recency.remove(pos);
                }
            }
        }
        self.touch(alias);
        Ok(())
    }

    pub fn contains_alias(&self, alias: u16) -> bool {
        self.by_alias.contains_key(&alias)
    }

    /// Look up the alias for a topic, promoting it to most recently used.
    pub fn alias_by_topic(&mut self, topic: &str) -> Option<u16> {
        let alias = *self.by_topic.get(topic)?;
        self.touch(alias);
        Some(alias)
    }

    /// The next alias to assign: the first numerically free alias, or the
    /// least recently used one for eviction once the space is full.
    pub fn lru_alias(&self) -> u16 {
        if (self.by_alias.len() as u16) < self.max {
            for alias in 1..=self.max {
                if !self.by_alias.contains_key(&alias) {
                    return alias;
                }
            }
        }
        self.recency.back().copied().unwrap_or(1)
    }
}

/// Receive-side alias map: alias -> topic only, no recency.
#[derive(Debug)]
pub struct TopicAliasRecv {
    max: u16,
    topics: HashMap<u16, String>,
}

impl TopicAliasRecv {
    pub fn new(max: u16) -> Self {
        Self {
            max,
            topics: HashMap::new(),
        }
    }

    pub fn put(&mut self, topic: &str, alias: u16) -> Result<(), TopicAliasError> {
        if alias == 0 || alias > self.max {
            return Err(TopicAliasError::OutOfRange {
                alias,
                max: self.max,
            });
        }
        self.topics.insert(alias, topic.to_owned());
        Ok(())
    }

    /// Resolve an empty-topic publish.
    pub fn topic_by_alias(&self, alias: u16) -> Result<&str, TopicAliasError> {
        if alias == 0 || alias > self.max {
            return Err(TopicAliasError::OutOfRange {
                alias,
                max: self.max,
            });
        }
        self.topics
            .get(&alias)
            .map(String::as_str)
            .ok_or(TopicAliasError::Unresolved(alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_put_rejects_zero_and_above_max() {
        let mut aliases = TopicAliasSend::new(5);
        assert!(matches!(
            aliases.put("t", 0),
            Err(TopicAliasError::OutOfRange { alias: 0, max: 5 })
        ));
        assert!(matches!(
            aliases.put("t", 6),
            Err(TopicAliasError::OutOfRange { alias: 6, max: 5 })
        ));
        assert!(aliases.put("t", 5).is_ok());
    }

    #[test]
    fn send_put_overwrites_both_directions() {
        let mut aliases = TopicAliasSend::new(5);
        aliases.put("a", 1).unwrap();
        aliases.put("b", 1).unwrap();
        assert_eq!(aliases.alias_by_topic("a"), None);
        assert_eq!(aliases.alias_by_topic("b"), Some(1));

        // Re-mapping the same topic to a new alias frees the old one.
        aliases.put("b", 2).unwrap();
        assert_eq!(aliases.alias_by_topic("b"), Some(2));
        assert_eq!(aliases.lru_alias(), 1);
    }

    #[test]
    fn lru_prefers_first_free_alias() {
        let mut aliases = TopicAliasSend::new(3);
        assert_eq!(aliases.lru_alias(), 1);
        aliases.put("a", 1).unwrap();
        assert_eq!(aliases.lru_alias(), 2);
        aliases.put("b", 3).unwrap();
        assert_eq!(aliases.lru_alias(), 2);
    }

    #[test]
    fn lru_evicts_least_recently_used_when_full() {
        let mut aliases = TopicAliasSend::new(2);
        aliases.put("a", 1).unwrap();
        aliases.put("b", 2).unwrap();
        // "a" was used longest ago.
        assert_eq!(aliases.lru_alias(), 1);
        // Touching "a" makes alias 2 the eviction candidate.
        aliases.alias_by_topic("a");
        assert_eq!(aliases.lru_alias(), 2);
    }

    #[test]
    fn recv_resolves_and_reports_unknown() {
        let mut aliases = TopicAliasRecv::new(4);
        aliases.put("sensors/temp", 2).unwrap();
        assert_eq!(aliases.topic_by_alias(2), Ok("sensors/temp"));
        assert_eq!(aliases.topic_by_alias(3), Err(TopicAliasError::Unresolved(3)));
        assert!(matches!(
            aliases.topic_by_alias(9),
            Err(TopicAliasError::OutOfRange { alias: 9, max: 4 })
        ));
        assert!(matches!(
            aliases.put("x", 0),
            Err(TopicAliasError::OutOfRange { .. })
        ));
    }
}
