//! Robot keys, robots, and the credential lookup that turns them into a
//! [`SessionProfile`].

use callbridge_types::{AsrOption, LlmSettings, SessionProfile, TtsOption};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

/// Provider name the call backend expects for both ASR and TTS.
const SPEECH_PROVIDER: &str = "tencent";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("key not found")]
    KeyNotFound,
    #[error("api secret does not match")]
    SecretMismatch,
    #[error("robot not found")]
    RobotNotFound,
}

/// Provider credentials owned by one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotKey {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub llm_provider: String,
    pub llm_api_key: String,
    pub llm_api_url: String,
    pub asr_provider: String,
    pub asr_app_id: String,
    pub asr_secret_id: String,
    pub asr_secret_key: String,
    pub asr_language: String,
    pub tts_provider: String,
    pub tts_app_id: String,
    pub tts_secret_id: String,
    pub tts_secret_key: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Parameters for [`create_robot_key`].
#[derive(Debug, Clone, Default)]
pub struct NewRobotKey {
    pub user_id: i64,
    pub name: String,
    pub llm_provider: String,
    pub llm_api_key: String,
    pub llm_api_url: String,
    pub asr_provider: String,
    pub asr_app_id: String,
    pub asr_secret_id: String,
    pub asr_secret_key: String,
    /// Empty means the column default (`zh`).
    pub asr_language: String,
    pub tts_provider: String,
    pub tts_app_id: String,
    pub tts_secret_id: String,
    pub tts_secret_key: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Voice persona of a robot.
#[derive(Debug, Clone, PartialEq)]
pub struct Robot {
    pub id: i64,
    pub name: String,
    pub user_id: i64,
    pub speed: f32,
    pub volume: i32,
    pub speaker: String,
    pub emotion: String,
    pub system_prompt: String,
}

/// Parameters for [`create_robot`].
#[derive(Debug, Clone, Default)]
pub struct NewRobot {
    pub name: String,
    pub user_id: i64,
    pub speed: f32,
    pub volume: i32,
    pub speaker: String,
    pub emotion: String,
    pub system_prompt: String,
}

/// Inserts a robot key and returns its row id.
pub fn create_robot_key(conn: &Connection, key: &NewRobotKey) -> Result<i64, ProfileError> {
    let asr_language = if key.asr_language.is_empty() {
        "zh"
    } else {
        key.asr_language.as_str()
    };
    conn.execute(
        "INSERT INTO robot_keys (
            user_id, name, llm_provider, llm_api_key, llm_api_url,
            asr_provider, asr_app_id, asr_secret_id, asr_secret_key, asr_language,
            tts_provider, tts_app_id, tts_secret_id, tts_secret_key,
            api_key, api_secret
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            key.user_id,
            key.name,
            key.llm_provider,
            key.llm_api_key,
            key.llm_api_url,
            key.asr_provider,
            key.asr_app_id,
            key.asr_secret_id,
            key.asr_secret_key,
            asr_language,
            key.tts_provider,
            key.tts_app_id,
            key.tts_secret_id,
            key.tts_secret_key,
            key.api_key,
            key.api_secret,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Inserts a robot and returns its id.
pub fn create_robot(conn: &Connection, robot: &NewRobot) -> Result<i64, ProfileError> {
    conn.execute(
        "INSERT INTO robots (name, user_id, speed, volume, speaker, emotion, system_prompt)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            robot.name,
            robot.user_id,
            f64::from(robot.speed),
            robot.volume,
            robot.speaker,
            robot.emotion,
            robot.system_prompt,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Looks up a live (not soft-deleted) robot key by its public api key.
pub fn get_robot_key_by_api_key(
    conn: &Connection,
    api_key: &str,
) -> Result<Option<RobotKey>, ProfileError> {
    Ok(conn
        .query_row(
            "SELECT
                id, user_id, name, llm_provider, llm_api_key, llm_api_url,
                asr_provider, asr_app_id, asr_secret_id, asr_secret_key, asr_language,
                tts_provider, tts_app_id, tts_secret_id, tts_secret_key,
                api_key, api_secret
            FROM robot_keys WHERE api_key = ?1 AND deleted_at IS NULL",
            [api_key],
            map_row_to_robot_key,
        )
        .optional()?)
}

/// Looks up a live robot by id.
pub fn get_robot(conn: &Connection, robot_id: i64) -> Result<Option<Robot>, ProfileError> {
    Ok(conn
        .query_row(
            "SELECT id, name, user_id, speed, volume, speaker, emotion, system_prompt
            FROM robots WHERE id = ?1 AND deleted_at IS NULL",
            [robot_id],
            map_row_to_robot,
        )
        .optional()?)
}

/// Resolves the ASR/TTS options and LLM settings for a session.
///
/// `model` is the chat model to request; robot keys do not store one.
pub fn load_session_profile(
    conn: &Connection,
    api_key: &str,
    robot_id: i64,
    model: &str,
) -> Result<SessionProfile, ProfileError> {
    let key = get_robot_key_by_api_key(conn, api_key)?.ok_or(ProfileError::KeyNotFound)?;
    // Another tenant's robot is reported the same as a missing one.
    let robot = get_robot(conn, robot_id)?
        .filter(|robot| robot.user_id == key.user_id)
        .ok_or(ProfileError::RobotNotFound)?;

    tracing::debug!(key_id = key.id, robot_id = robot.id, "resolved session profile");

    Ok(SessionProfile {
        asr: AsrOption {
            provider: SPEECH_PROVIDER.to_string(),
            app_id: key.asr_app_id,
            secret_id: key.asr_secret_id,
            secret_key: key.asr_secret_key,
            model_type: key.asr_language,
            endpoint: key.asr_provider,
        },
        tts: TtsOption {
            provider: SPEECH_PROVIDER.to_string(),
            speaker: robot.speaker,
            app_id: key.tts_app_id,
            secret_id: key.tts_secret_id,
            secret_key: key.tts_secret_key,
            endpoint: key.tts_provider,
            speed: robot.speed,
            volume: robot.volume,
            emotion: robot.emotion,
        },
        llm: LlmSettings {
            endpoint: key.llm_api_url,
            api_key: key.llm_api_key,
            system_prompt: robot.system_prompt,
            model: model.to_string(),
        },
    })
}

/// Like [`load_session_profile`], but also requires `api_secret` to match.
pub fn verify_and_load_session_profile(
    conn: &Connection,
    api_key: &str,
    api_secret: &str,
    robot_id: i64,
    model: &str,
) -> Result<SessionProfile, ProfileError> {
    let key = get_robot_key_by_api_key(conn, api_key)?.ok_or(ProfileError::KeyNotFound)?;
    if key.api_secret != api_secret {
        return Err(ProfileError::SecretMismatch);
    }
    load_session_profile(conn, api_key, robot_id, model)
}

fn map_row_to_robot_key(row: &Row) -> rusqlite::Result<RobotKey> {
    Ok(RobotKey {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        llm_provider: row.get(3)?,
        llm_api_key: row.get(4)?,
        llm_api_url: row.get(5)?,
        asr_provider: row.get(6)?,
        asr_app_id: row.get(7)?,
        asr_secret_id: row.get(8)?,
        asr_secret_key: row.get(9)?,
        asr_language: row.get(10)?,
        tts_provider: row.get(11)?,
        tts_app_id: row.get(12)?,
        tts_secret_id: row.get(13)?,
        tts_secret_key: row.get(14)?,
        api_key: row.get(15)?,
        api_secret: row.get(16)?,
    })
}

fn map_row_to_robot(row: &Row) -> rusqlite::Result<Robot> {
    let speed: f64 = row.get(3)?;
    Ok(Robot {
        id: row.get(0)?,
        name: row.get(1)?,
        user_id: row.get(2)?,
        speed: speed as f32,
        volume: row.get(4)?,
        speaker: row.get(5)?,
        emotion: row.get(6)?,
        system_prompt: row.get(7)?,
    })
}
