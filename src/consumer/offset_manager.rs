//! Offsets to commit when a batch is acknowledged

use std::collections::BTreeMap;
use tracing::debug;

use crate::event::RawMessage;

/// Next offset to consume for every topic-partition in a batch
///
/// Kafka commits the position of the next message to read, so each entry is
/// the highest offset seen plus one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitPlan {
    offsets: BTreeMap<(String, i32), i64>,
}

impl CommitPlan {
    /// Collect commit positions from a batch
    pub fn from_messages(messages: &[RawMessage]) -> Self {
        let mut offsets: BTreeMap<(String, i32), i64> = BTreeMap::new();
        for message in messages {
            let next = message.offset + 1;
            offsets
                .entry((message.topic.clone(), message.partition))
                .and_modify(|o| *o = (*o).max(next))
                .or_insert(next);
        }
        debug!("Commit plan covers {} partitions", offsets.len());
        Self { offsets }
    }

    /// Position to commit for one partition
    pub fn next_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.offsets.get(&(topic.to_string(), partition)).copied()
    }

    /// Partitions in the plan
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether nothing needs committing
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// `(topic, partition, next offset)` entries in topic/partition order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32, i64)> {
        self.offsets
            .iter()
            .map(|((topic, partition), offset)| (topic.as_str(), *partition, *offset))
    }

    /// Build the rdkafka partition list for a commit
    #[cfg(feature = "kafka")]
    pub fn to_topic_partition_list(
        &self,
    ) -> Result<rdkafka::TopicPartitionList, rdkafka::error::KafkaError> {
        let mut tpl = rdkafka::TopicPartitionList::new();
        for (topic, partition, offset) in self.iter() {
            tpl.add_partition_offset(topic, partition, rdkafka::Offset::Offset(offset))?;
        }
        Ok(tpl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_offset_plus_one_per_partition() {
        let messages = vec![
            RawMessage::new("metrics", 0, 10, "{}"),
            RawMessage::new("metrics", 1, 4, "{}"),
            RawMessage::new("metrics", 0, 12, "{}"),
            RawMessage::new("metrics", 0, 11, "{}"),
            RawMessage::new("other", 0, 99, "{}"),
        ];
        let plan = CommitPlan::from_messages(&messages);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.next_offset("metrics", 0), Some(13));
        assert_eq!(plan.next_offset("metrics", 1), Some(5));
        assert_eq!(plan.next_offset("other", 0), Some(100));
        assert_eq!(plan.next_offset("metrics", 2), None);
    }

    #[test]
    fn test_iteration_order() {
        let plan = CommitPlan::from_messages(&[
            RawMessage::new("b", 0, 1, "{}"),
            RawMessage::new("a", 2, 7, "{}"),
            RawMessage::new("a", 1, 3, "{}"),
        ]);
        let entries: Vec<_> = plan.iter().collect();
        assert_eq!(entries, vec![("a", 1, 4), ("a", 2, 8), ("b", 0, 2)]);
    }

    #[test]
    fn test_empty_batch() {
        assert!(CommitPlan::from_messages(&[]).is_empty());
    }
}
