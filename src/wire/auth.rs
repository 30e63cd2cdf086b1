//! HMAC-SHA256 mutual challenge/response handshake.
//!
//! Modeled on the same shared-secret handshake CPython's
//! `multiprocessing.connection` uses between a `Listener` and a `Client`:
//! each side sends the other a random challenge and must answer with the
//! correct HMAC digest before either will trust frames from the peer. A
//! worker and a coordinator started with mismatched `--authkey` values
//! fail here, before either side's service registry ever sees a request.
//!
//! Wire shape (each step is one [`super::framing`] frame of raw bytes,
//! not a bincode envelope — the handshake has to succeed before either
//! side is willing to trust anything about the other's serialization):
//!
//! ```text
//! responder -> initiator : challenge (32 random bytes)
//! initiator -> responder : HMAC(authkey, challenge)          (32 bytes)
//! initiator -> responder : challenge (32 random bytes)
//! responder -> initiator : HMAC(authkey, challenge)          (32 bytes)
//! ```
//!
//! "Responder" is whichever side accepted the TCP connection (the
//! coordinator); "initiator" is whichever side dialed it (the worker).
//! Both directions are checked, so a worker can't be tricked into talking
//! to a coordinator that doesn't know the shared key either.

use std::io::{Read, Write};

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{CorralError, Result};
use crate::wire::framing::{read_frame, write_frame};

const CHALLENGE_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

fn digest(authkey: &[u8], challenge: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(authkey).expect("HMAC accepts a key of any length");
    mac.update(challenge);
    mac.finalize().into_bytes().to_vec()
}

fn random_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::rng().fill_bytes(&mut challenge);
    challenge
}

const STATUS_OK: [u8; 1] = [1];
const STATUS_FAIL: [u8; 1] = [0];

/// Run the responder side of the handshake (the coordinator, just after
/// `accept()`).
///
/// Reports pass/fail of its own check back to the initiator via an
/// explicit status byte before asking the initiator to answer a second
/// challenge, so a failed first check never leaves the peer blocked on a
/// read that will never come.
pub fn respond<S: Read + Write>(stream: &mut S, authkey: &[u8]) -> Result<()> {
    let our_challenge = random_challenge();
    write_frame(stream, &our_challenge)?;
    let their_answer = read_frame(stream)?;
    let ok = their_answer == digest(authkey, &our_challenge);
    write_frame(stream, if ok { &STATUS_OK } else { &STATUS_FAIL })?;
    if !ok {
        return Err(CorralError::Auth);
    }

    let their_challenge = read_frame(stream)?;
    write_frame(stream, &digest(authkey, &their_challenge))?;
    Ok(())
}

/// Run the initiator side of the handshake (the worker, just after
/// `connect()`).
pub fn initiate<S: Read + Write>(stream: &mut S, authkey: &[u8]) -> Result<()> {
    let their_challenge = read_frame(stream)?;
    write_frame(stream, &digest(authkey, &their_challenge))?;
    if read_frame(stream)? != STATUS_OK {
        return Err(CorralError::Auth);
    }

    let our_challenge = random_challenge();
    write_frame(stream, &our_challenge)?;
    let their_answer = read_frame(stream)?;
    if their_answer != digest(authkey, &our_challenge) {
        return Err(CorralError::Auth);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::thread;

    struct DuplexPipe {
        read: mpsc::Receiver<Vec<u8>>,
        write: mpsc::Sender<Vec<u8>>,
        pending: Cursor<Vec<u8>>,
    }

    impl Read for DuplexPipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if (self.pending.position() as usize) >= self.pending.get_ref().len() {
                let chunk = self.read.recv().map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer gone")
                })?;
                self.pending = Cursor::new(chunk);
            }
            self.pending.read(buf)
        }
    }

    impl Write for DuplexPipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write
                .send(buf.to_vec())
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"))?;
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn pipe_pair() -> (DuplexPipe, DuplexPipe) {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        (
            DuplexPipe { read: rx_a, write: tx_b, pending: Cursor::new(Vec::new()) },
            DuplexPipe { read: rx_b, write: tx_a, pending: Cursor::new(Vec::new()) },
        )
    }

    #[test]
    fn matching_keys_succeed_both_directions() {
        let (mut responder, mut initiator) = pipe_pair();
        let handle = thread::spawn(move || respond(&mut responder, b"sharedkey"));
        initiate(&mut initiator, b"sharedkey").unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn mismatched_keys_fail() {
        let (mut responder, mut initiator) = pipe_pair();
        let handle = thread::spawn(move || respond(&mut responder, b"serverkey"));
        let err = initiate(&mut initiator, b"wrongkey").unwrap_err();
        assert!(matches!(err, CorralError::Auth));
        // The responder also observes a failed answer to its own challenge.
        assert!(handle.join().unwrap().is_err());
    }
}
