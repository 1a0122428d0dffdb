//! I/O virtualization shim
//!
//! The shim is a Python driver embedded in the binary and handed to the
//! interpreter with `-c`. Inside the worker process it rewires the
//! submission's standard I/O: line reads consume the pre-supplied input
//! script (trailing newline stripped, exhaustion raises a distinguishable
//! input-exhaustion error) and writes accumulate in an in-memory buffer.
//! The submission executes with an empty top-level environment.
//!
//! The child's real stdin/stdout carry the wire protocol below: one JSON
//! payload in, exactly one tagged JSON reply out.

use serde::{Deserialize, Serialize};

/// Embedded driver source, executed as `python3 -I -c <DRIVER>`
pub const DRIVER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/shim.py"));

/// Payload written to the worker's stdin
#[derive(Debug, Serialize)]
pub struct WorkerPayload<'a> {
    pub code: &'a str,
    pub input: &'a str,
}

/// Reply status tag emitted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Exc,
}

/// Single reply line read from the worker's stdout
#[derive(Debug, Deserialize)]
pub struct WorkerReply {
    pub status: ReplyStatus,
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_is_embedded() {
        assert!(DRIVER.contains("scripted_input"));
        assert!(DRIVER.contains("exec(code, {})"));
    }

    #[test]
    fn test_reply_parses() {
        let reply: WorkerReply =
            serde_json::from_str(r#"{"status": "ok", "payload": "7\n"}"#).unwrap();
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(reply.payload, "7\n");

        let reply: WorkerReply =
            serde_json::from_str(r#"{"status": "exc", "payload": "ValueError: boom"}"#).unwrap();
        assert_eq!(reply.status, ReplyStatus::Exc);
    }

    #[test]
    fn test_payload_serializes() {
        let payload = WorkerPayload {
            code: "print(1)",
            input: "a\nb\n",
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""code":"print(1)""#));
        assert!(json.contains(r#""input":"a\nb\n""#));
    }
}
