//! Teacher-grounded helpers kept for their original purpose: the
//! reconnect backoff C5/C11 reuse. The rest of the teacher's streaming
//! backend (multi-format writers, trade detection, SQLite mirroring) has
//! no counterpart here and was folded into `ingress`/`persistence` instead.

pub mod error_handler;
