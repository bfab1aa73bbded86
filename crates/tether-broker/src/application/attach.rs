//! Attach Service: the ordering and precondition rules for inbound
//! master/slave connections.
//!
//! Each attach happens in two halves around the WebSocket upgrade:
//!
//! ```text
//!   master:  parse id ─▶ prepare_master (claim) ─▶ upgrade ─▶ complete_master
//!   slave:   parse id ─▶ prepare_slave (lookup)  ─▶ upgrade ─▶ complete_slave
//! ```
//!
//! Everything that can refuse a request without side effects runs in the
//! `prepare_*` half, so a refusal becomes a plain HTTP error and never leaves
//! a half-open socket behind.  The HTTP plumbing itself lives in
//! `infrastructure::http_server`.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use tether_core::{SessionId, SessionIdError, SessionState};

use crate::application::control::{Control, ControlError};
use crate::application::link::Link;
use crate::application::session::{Session, SessionError};

/// Why an attach request was refused.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error(transparent)]
    MissingId(#[from] SessionIdError),

    #[error("request must be a WebSocket upgrade")]
    NotUpgrade,

    #[error("session \"{0}\" does not exist")]
    UnknownSession(SessionId),

    #[error("session \"{0}\" already has a slave")]
    SlaveAlreadyAttached(SessionId),

    #[error("session \"{id}\" is not waiting for a slave (state: {state})")]
    NotWaitingForSlave { id: SessionId, state: SessionState },

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Normalises the id taken from the request path.
pub fn parse_id(raw: &str) -> Result<SessionId, AttachError> {
    Ok(SessionId::parse(raw)?)
}

// ── Master ────────────────────────────────────────────────────────────────────

/// Claims `id` for a new session.  Runs before the upgrade.
pub async fn prepare_master(
    control: &Arc<Control>,
    id: &SessionId,
) -> Result<Arc<Session>, AttachError> {
    let session = control.create_session(id).await.map_err(|e| {
        warn!(session_id = %id, "master attach refused: {e}");
        e
    })?;
    Ok(session)
}

/// Attaches the upgraded master connection.
///
/// A session that cannot take its master is abandoned, so its claim is not
/// leaked.
pub fn complete_master(session: &Arc<Session>, link: Link) -> Result<(), AttachError> {
    if let Err(e) = session.attach_master(link) {
        warn!(session_id = %session.id(), "master attach failed after upgrade: {e}");
        session.abandon();
        return Err(e.into());
    }
    Ok(())
}

// ── Slave ─────────────────────────────────────────────────────────────────────

/// Finds the session a slave is asking for.  Runs before the upgrade and
/// mutates nothing.
pub fn prepare_slave(control: &Control, id: &SessionId) -> Result<Arc<Session>, AttachError> {
    let Some(session) = control.get_session(id) else {
        info!(session_id = %id, "slave attach refused: unknown session");
        return Err(AttachError::UnknownSession(id.clone()));
    };
    if session.has_slave() {
        info!(session_id = %id, "slave attach refused: slave already attached");
        return Err(AttachError::SlaveAlreadyAttached(id.clone()));
    }
    let state = session.state();
    if state != SessionState::WaitingForSlave {
        info!(session_id = %id, %state, "slave attach refused: wrong state");
        return Err(AttachError::NotWaitingForSlave {
            id: id.clone(),
            state,
        });
    }
    Ok(session)
}

/// Attaches the upgraded slave connection.
///
/// Another slave may have won the race during the upgrade; the loser's link is
/// closed and the winner is left alone.
pub fn complete_slave(session: &Arc<Session>, link: Link) -> Result<(), AttachError> {
    session.attach_slave(link).map_err(|e| {
        warn!(session_id = %session.id(), "slave attach failed after upgrade: {e}");
        AttachError::from(e)
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::directory::{ClaimOutcome, MockSessionDirectory};
    use crate::application::link::{link, Outbound};
    use std::time::Duration;
    use tether_core::{BrokerIdentity, ClaimToken};

    fn granting_control() -> Arc<Control> {
        let mut directory = MockSessionDirectory::new();
        directory
            .expect_claim()
            .returning(|_| Ok(ClaimOutcome::Granted(ClaimToken::generate())));
        directory.expect_release().returning(|_, _| Ok(()));
        Control::new(
            Arc::new(directory),
            BrokerIdentity {
                host: "broker-test".into(),
                ip: "127.0.0.1".parse().unwrap(),
                port: 8381,
            },
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_blank_id_is_missing_id() {
        let err = parse_id("   ").unwrap_err();
        assert!(matches!(err, AttachError::MissingId(_)));
        assert_eq!(err.to_string(), "must provide \"id\"");
    }

    #[test]
    fn test_id_is_case_folded() {
        assert_eq!(parse_id("ABC123").unwrap().as_str(), "abc123");
    }

    #[tokio::test]
    async fn test_slave_for_unknown_session_is_refused_without_registering() {
        // Arrange
        let control = granting_control();

        // Act
        let err = prepare_slave(&control, &parse_id("nobody").unwrap()).unwrap_err();

        // Assert
        assert!(matches!(err, AttachError::UnknownSession(_)));
        assert_eq!(control.session_count(), 0);
    }

    #[tokio::test]
    async fn test_slave_before_master_upgrade_is_refused() {
        // Arrange: claimed, but master not attached yet
        let control = granting_control();
        let id = parse_id("abc123").unwrap();
        prepare_master(&control, &id).await.unwrap();

        // Act
        let err = prepare_slave(&control, &id).unwrap_err();

        // Assert
        assert!(matches!(
            err,
            AttachError::NotWaitingForSlave {
                state: SessionState::WaitingForMaster,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_full_attach_sequence_reaches_forwarding() {
        // Arrange
        let control = granting_control();
        let id = parse_id("abc123").unwrap();
        let (master, _master_remote) = link();
        let (slave, _slave_remote) = link();

        // Act
        let session = prepare_master(&control, &id).await.unwrap();
        complete_master(&session, master).unwrap();
        let found = prepare_slave(&control, &parse_id("ABC123").unwrap()).unwrap();
        complete_slave(&found, slave).unwrap();

        // Assert
        assert!(Arc::ptr_eq(&session, &found));
        assert_eq!(session.state(), SessionState::Forwarding);
    }

    #[tokio::test]
    async fn test_second_slave_is_refused_before_upgrade() {
        // Arrange
        let control = granting_control();
        let id = parse_id("abc123").unwrap();
        let session = prepare_master(&control, &id).await.unwrap();
        let (master, _master_remote) = link();
        let (slave, _slave_remote) = link();
        complete_master(&session, master).unwrap();
        complete_slave(&session, slave).unwrap();

        // Act
        let err = prepare_slave(&control, &id).unwrap_err();

        // Assert
        assert!(matches!(err, AttachError::SlaveAlreadyAttached(_)));
        assert!(session.has_slave());
        assert_eq!(session.state(), SessionState::Forwarding);
    }

    #[tokio::test]
    async fn test_slave_losing_upgrade_race_is_closed() {
        // Arrange: two slaves both passed prepare_slave
        let control = granting_control();
        let id = parse_id("abc123").unwrap();
        let session = prepare_master(&control, &id).await.unwrap();
        let (master, _master_remote) = link();
        complete_master(&session, master).unwrap();
        let first = prepare_slave(&control, &id).unwrap();
        let second = prepare_slave(&control, &id).unwrap();
        let (winner, _winner_remote) = link();
        let (loser, mut loser_remote) = link();

        // Act
        complete_slave(&first, winner).unwrap();
        let err = complete_slave(&second, loser).unwrap_err();

        // Assert
        assert!(matches!(
            err,
            AttachError::Session(SessionError::SlaveAlreadyAttached)
        ));
        assert!(matches!(
            loser_remote.outbound.recv().await,
            Some(Outbound::End(_))
        ));
        assert_eq!(session.state(), SessionState::Forwarding);
    }

    #[tokio::test]
    async fn test_failed_master_attach_abandons_session() {
        // Arrange: a session whose master slot is already taken
        let control = granting_control();
        let id = parse_id("abc123").unwrap();
        let session = prepare_master(&control, &id).await.unwrap();
        let (first, _first_remote) = link();
        complete_master(&session, first).unwrap();
        let (second, _second_remote) = link();

        // Act
        let result = complete_master(&session, second);

        // Assert
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(control.get_session(&id).is_none());
    }
}
