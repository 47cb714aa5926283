//! Redis Streams adapters for the message bus.
//!
//! The dispatcher publishes `user-deleted` events with [`RedisStreamsPublisher`];
//! downstream feedback is consumed through a consumer group by
//! [`RedisStreamsFeedbackSource`]. Both share one `bb8` connection pool.

mod redis_streams;

pub use redis_streams::{
    FEEDBACK_DLQ_STREAM, FEEDBACK_GROUP, FEEDBACK_STREAM, RedisPool, RedisStreamsFeedbackSource,
    RedisStreamsPublisher, StreamConsumerConfig, connect,
};
