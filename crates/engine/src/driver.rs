//! JSON-lines command dispatch for the driver binary.
//!
//! Each input line is a [`CommandEnvelope`]; each output line is a
//! [`CommandOutcome`]. Malformed lines produce a `validation_failed` outcome
//! and do not stop the loop.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use common::protocol::{Command, CommandEnvelope, CommandOutcome, ErrorResponse};
use common::ServiceError;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::engine::Engine;

/// Run one command against the engine.
///
/// # Errors
///
/// Whatever the engine operation fails with.
pub fn dispatch(engine: &Engine, envelope: &CommandEnvelope) -> Result<Value, ServiceError> {
    let actor = &envelope.actor;
    match &envelope.command {
        Command::Generate(request) => to_json(engine.generate(actor, request)?),
        Command::Set(request) => to_json(engine.set(actor, request)?),
        Command::Get { name } => to_json(engine.get(actor, name)?),
        Command::GetById { id } => to_json(engine.get_by_id(actor, *id)?),
        Command::Versions { name } => to_json(engine.versions(actor, name)?),
        Command::Regenerate { name } => to_json(engine.regenerate(actor, name)?),
        Command::Delete { name } => {
            engine.delete(actor, name)?;
            Ok(Value::Null)
        }
        Command::GetPermissions { credential_name } => {
            to_json(engine.permissions(actor, credential_name)?)
        }
        Command::GetPermission {
            credential_name,
            target_actor,
        } => to_json(engine.permission(actor, credential_name, target_actor)?),
        Command::AddPermissions(request) => to_json(engine.add_permissions(actor, request)?),
        Command::SetPermissions {
            credential_name,
            target_actor,
            operations,
        } => to_json(engine.set_permissions(actor, credential_name, target_actor, operations)?),
        Command::DeletePermissions {
            credential_name,
            target_actor,
        } => {
            engine.delete_permissions(actor, credential_name, target_actor)?;
            Ok(Value::Null)
        }
        Command::RotateEncryptionKeys => {
            Ok(json!({ "rotated": engine.rotate_encryption_keys(actor)? }))
        }
    }
}

/// Parse and run one input line.
pub fn handle_line(engine: &Engine, line: &str) -> CommandOutcome {
    let envelope: CommandEnvelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "unparseable command");
            return CommandOutcome::Error(ErrorResponse::new(
                "validation_failed",
                format!("malformed command: {e}"),
            ));
        }
    };
    match dispatch(engine, &envelope) {
        Ok(value) => CommandOutcome::Ok(value),
        Err(e) => {
            if matches!(e, ServiceError::Internal(_) | ServiceError::DecryptionFailed(_)) {
                warn!(actor = %envelope.actor, error = %e, "command failed");
            }
            CommandOutcome::Error(ErrorResponse::from(&e))
        }
    }
}

/// Serve commands from `input` until EOF, writing one outcome per line.
///
/// # Errors
///
/// Returns an error only for I/O failures on `input` or `output`.
pub fn run<R: BufRead, W: Write>(engine: &Engine, input: R, mut output: W) -> Result<usize> {
    let mut handled = 0;
    for line in input.lines() {
        let line = line.context("failed to read command")?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome = handle_line(engine, &line);
        serde_json::to_writer(&mut output, &outcome).context("failed to write outcome")?;
        output.write_all(b"\n").context("failed to write outcome")?;
        output.flush().context("failed to flush output")?;
        handled += 1;
    }
    Ok(handled)
}

fn to_json(value: impl Serialize) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::Internal(format!("response encoding failed: {e}")))
}
