//! # Block Sync
//!
//! A pushed record lands at the index it carries, whatever the receiver's
//! head was, and the receiver's next local entry chains onto it.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bc_02_block_log::{BlockLog, BlockLogError, Opcode, BLOCK_SIZE};
    use shared_bus::EventBus;

    async fn open_log(dir: &std::path::Path, name: &str) -> BlockLog {
        let log = BlockLog::new(Arc::new(EventBus::new()), dir.join(format!("{name}.blockchain")));
        log.open().await.unwrap();
        log
    }

    #[tokio::test]
    async fn test_push_is_written_at_its_embedded_index() {
        let dir = tempfile::tempdir().unwrap();
        let sender = open_log(dir.path(), "sender").await;
        for message in ["one", "two", "three"] {
            sender.store("sam@example.org", message).await.unwrap();
        }
        let receiver = open_log(dir.path(), "receiver").await;
        assert_eq!(receiver.head_index(), 0);

        let push = sender.make_new_block(0).await.unwrap();
        assert_eq!(push[0], Opcode::NewBlock.as_byte());
        let saved = receiver.save(&push[1..]).await.unwrap();

        assert_eq!(saved.index, 3);
        assert_eq!(receiver.head_index(), 3);
        assert_eq!(receiver.head_block().await.unwrap(), sender.head_block().await.unwrap());
        assert_eq!(
            receiver.head_hash().await.unwrap(),
            sender.head_hash().await.unwrap()
        );

        let size = std::fs::metadata(receiver.path().unwrap()).unwrap().len();
        assert_eq!(size, 4 * BLOCK_SIZE as u64);
    }

    #[tokio::test]
    async fn test_local_entry_chains_onto_a_pushed_head() {
        let dir = tempfile::tempdir().unwrap();
        let sender = open_log(dir.path(), "sender").await;
        sender.store("sam@example.org", "upstream").await.unwrap();
        let receiver = open_log(dir.path(), "receiver").await;

        let push = sender.make_new_block(0).await.unwrap();
        let pushed = receiver.save(&push[1..]).await.unwrap();
        let local = receiver.store("rita@example.org", "reply").await.unwrap();

        assert_eq!(local.index, pushed.index + 1);
        assert_eq!(local.previous_hash, pushed.hash());
    }

    #[tokio::test]
    async fn test_reopen_recovers_the_pushed_head() {
        let dir = tempfile::tempdir().unwrap();
        let sender = open_log(dir.path(), "sender").await;
        for message in ["a", "b"] {
            sender.store("sam@example.org", message).await.unwrap();
        }
        let push = sender.make_new_block(0).await.unwrap();

        let receiver = open_log(dir.path(), "receiver").await;
        receiver.save(&push[1..]).await.unwrap();
        receiver.close().await;

        let reopened = open_log(dir.path(), "receiver").await;
        assert_eq!(reopened.head_index(), 2);
        assert_eq!(reopened.head_value().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_truncated_push_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let sender = open_log(dir.path(), "sender").await;
        sender.store("sam@example.org", "cut").await.unwrap();
        let receiver = open_log(dir.path(), "receiver").await;

        let push = sender.make_new_block(0).await.unwrap();
        let result = receiver.save(&push[1..BLOCK_SIZE]).await;
        assert!(matches!(
            result,
            Err(BlockLogError::InvalidRecordLength { .. })
        ));
        assert_eq!(receiver.head_index(), 0);
        let size = std::fs::metadata(receiver.path().unwrap()).unwrap().len();
        assert_eq!(size, BLOCK_SIZE as u64);
    }
}
