//! Persistence for the callbridge credential/config lookup.
//!
//! Provides SQLite connection pooling (via `r2d2`), embedded SQL migrations,
//! and the robot-key / robot records a session's ASR, TTS and LLM settings
//! are resolved from.

mod migrations;
mod pool;
mod robots;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use robots::{
    create_robot, create_robot_key, get_robot, get_robot_key_by_api_key, load_session_profile,
    verify_and_load_session_profile, NewRobot, NewRobotKey, ProfileError, Robot, RobotKey,
};
