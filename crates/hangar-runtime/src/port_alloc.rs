use std::{io::ErrorKind, net::TcpListener};

use crate::error::{OrchestratorError, Result};

fn probe(port: u16) -> Result<()> {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(l) => {
            l.set_nonblocking(true).ok();
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AddrInUse => Err(OrchestratorError::PortUnavailable {
            port,
            reason: "already in use".to_string(),
        }),
        Err(e) => Err(OrchestratorError::PortUnavailable {
            port,
            reason: e.to_string(),
        }),
    }
}

/// `0` asks the OS for a free port; anything else is bind-tested.
pub fn allocate_tcp_port(preferred: u16) -> Result<u16> {
    if preferred != 0 {
        probe(preferred)?;
        return Ok(preferred);
    }

    let listener = TcpListener::bind(("0.0.0.0", 0)).map_err(|e| {
        OrchestratorError::PortUnavailable {
            port: 0,
            reason: e.to_string(),
        }
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| OrchestratorError::PortUnavailable {
            port: 0,
            reason: e.to_string(),
        })?
        .port();
    Ok(port)
}

/// A port whose successor is also free, for launches binding `port` and `port + 1`.
pub fn allocate_port_pair(preferred: u16) -> Result<u16> {
    if preferred != 0 {
        if preferred == u16::MAX {
            return Err(OrchestratorError::PortUnavailable {
                port: preferred,
                reason: "no adjacent port above 65535".to_string(),
            });
        }
        probe(preferred)?;
        probe(preferred + 1)?;
        return Ok(preferred);
    }

    for _ in 0..16 {
        let p = allocate_tcp_port(0)?;
        if p < u16::MAX && probe(p + 1).is_ok() {
            return Ok(p);
        }
    }
    Err(OrchestratorError::PortUnavailable {
        port: 0,
        reason: "could not find two adjacent free ports".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_allocation_returns_bindable_port() {
        let p = allocate_tcp_port(0).unwrap();
        assert_ne!(p, 0);
        assert_eq!(allocate_tcp_port(p).unwrap(), p);
    }

    #[test]
    fn busy_port_is_rejected() {
        let held = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        let err = allocate_tcp_port(port).unwrap_err();
        assert_eq!(err.code(), "port_unavailable");
    }

    #[test]
    fn pair_allocation_checks_successor() {
        let p = allocate_port_pair(0).unwrap();
        assert!(p < u16::MAX);
        assert!(allocate_port_pair(u16::MAX).is_err());
    }
}
