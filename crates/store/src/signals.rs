//! Ordered pre/post-insert signal dispatch.
//!
//! Handlers are registered per (table, kind) pair and keep their
//! registration order. `connect` freezes the hub: the registration
//! list becomes an immutable dispatch table and later registrations
//! are rejected. A failing handler aborts the remainder of its chain
//! and the error propagates to the insert caller.

use std::collections::HashMap;

use crate::errors::{Result, StorageError};
use crate::value::Value;

/// Insert-side signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Fired before the row is committed; the insert is aborted if the
    /// handler fails.
    PreInsert,
    /// Fired after the row is committed; the row stays committed if
    /// the handler fails.
    PostInsert,
}

impl SignalKind {
    fn as_str(self) -> &'static str {
        match self {
            SignalKind::PreInsert => "pre-insert",
            SignalKind::PostInsert => "post-insert",
        }
    }
}

/// Payload passed to signal handlers.
#[derive(Debug)]
pub struct SignalEvent<'a> {
    /// Harmonized name of the table being written.
    pub table: &'a str,
    /// Committed row identifier; `None` on pre-insert.
    pub row_id: Option<i64>,
    /// Cell values of the row, defaults applied.
    pub values: &'a [(String, Value)],
}

/// Handler failure type. Anything the caller wants to surface.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A signal handler. Returning an error aborts the remainder of the
/// chain for the current insertion.
pub type Handler = Box<dyn FnMut(&SignalEvent<'_>) -> std::result::Result<(), HandlerError>>;

struct Registration {
    table: String,
    kind: SignalKind,
    label: Option<String>,
    handler: Handler,
}

#[derive(Default)]
pub(crate) struct SignalHub {
    pending: Vec<Registration>,
    dispatch: HashMap<(String, SignalKind), Vec<Registration>>,
    connected: bool,
}

impl SignalHub {
    /// Queue a handler. Fails once the hub is connected.
    pub(crate) fn register(
        &mut self,
        table: String,
        kind: SignalKind,
        handler: Handler,
        label: Option<String>,
    ) -> Result<()> {
        if self.connected {
            return Err(StorageError::SignalsConnected);
        }
        self.pending.push(Registration {
            table,
            kind,
            label,
            handler,
        });
        Ok(())
    }

    /// Freeze the hub. Registrations naming a table absent from
    /// `known_tables` are dropped with a warning, as a signal with no
    /// sender can never fire.
    pub(crate) fn connect(&mut self, known_tables: &[String]) {
        for reg in self.pending.drain(..) {
            if !known_tables.iter().any(|t| t == &reg.table) {
                tracing::warn!(
                    table = %reg.table,
                    kind = reg.kind.as_str(),
                    label = reg.label.as_deref().unwrap_or(""),
                    "signal not connected: sender table was never created"
                );
                continue;
            }
            self.dispatch
                .entry((reg.table.clone(), reg.kind))
                .or_default()
                .push(reg);
        }
        self.connected = true;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether any connected handler listens on `table`.
    pub(crate) fn has_handlers(&self, table: &str) -> bool {
        self.connected
            && (self
                .dispatch
                .contains_key(&(table.to_string(), SignalKind::PreInsert))
                || self
                    .dispatch
                    .contains_key(&(table.to_string(), SignalKind::PostInsert)))
    }

    /// Run the handler chain for (table, kind) in registration order.
    /// Does nothing before `connect`.
    pub(crate) fn emit(
        &mut self,
        table: &str,
        kind: SignalKind,
        row_id: Option<i64>,
        values: &[(String, Value)],
    ) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        let Some(chain) = self.dispatch.get_mut(&(table.to_string(), kind)) else {
            return Ok(());
        };
        let event = SignalEvent {
            table,
            row_id,
            values,
        };
        for reg in chain {
            (reg.handler)(&event).map_err(|source| StorageError::Handler {
                table: table.to_string(),
                kind: kind.as_str(),
                source,
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHub")
            .field("pending", &self.pending.len())
            .field("connected", &self.connected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn noop() -> Handler {
        Box::new(|_| Ok(()))
    }

    #[test]
    fn registration_order_is_preserved() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut hub = SignalHub::default();
        for tag in ["first", "second", "third"] {
            let calls = calls.clone();
            hub.register(
                "Stuff".to_string(),
                SignalKind::PreInsert,
                Box::new(move |_| {
                    calls.borrow_mut().push(tag);
                    Ok(())
                }),
                None,
            )
            .unwrap();
        }
        hub.connect(&["Stuff".to_string()]);
        hub.emit("Stuff", SignalKind::PreInsert, None, &[]).unwrap();
        assert_eq!(*calls.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn register_after_connect_is_rejected() {
        let mut hub = SignalHub::default();
        hub.connect(&[]);
        let err = hub.register("Stuff".to_string(), SignalKind::PostInsert, noop(), None);
        assert!(matches!(err, Err(StorageError::SignalsConnected)));
    }

    #[test]
    fn failing_handler_aborts_the_chain() {
        let calls = Rc::new(RefCell::new(0usize));
        let mut hub = SignalHub::default();
        hub.register(
            "Stuff".to_string(),
            SignalKind::PreInsert,
            Box::new(|_| Err("boom".into())),
            None,
        )
        .unwrap();
        let calls2 = calls.clone();
        hub.register(
            "Stuff".to_string(),
            SignalKind::PreInsert,
            Box::new(move |_| {
                *calls2.borrow_mut() += 1;
                Ok(())
            }),
            None,
        )
        .unwrap();
        hub.connect(&["Stuff".to_string()]);

        let err = hub.emit("Stuff", SignalKind::PreInsert, None, &[]);
        assert!(matches!(err, Err(StorageError::Handler { .. })));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn unknown_sender_is_dropped_at_connect() {
        let mut hub = SignalHub::default();
        hub.register("Ghost".to_string(), SignalKind::PreInsert, noop(), None)
            .unwrap();
        hub.connect(&[]);
        assert!(!hub.has_handlers("Ghost"));
    }
}
