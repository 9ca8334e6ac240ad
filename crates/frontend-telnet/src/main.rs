//! TCP/Telnet diagnostic frontend for the WMS board (bin `wms-diag`).
//!
//! Binds a listener and runs one diagnostic session per connection:
//!
//! - strips Telnet IAC option sequences before the monitor sees the stream
//! - character echo and backspace handling when the session `echo` flag is on
//! - drains reply/notification lines with CRLF, one write per line
//! - `--firmware` drives the demo washing-machine control task against the
//!   shared board, so sessions have live output transitions to observe
//!
//! The board is shared behind a mutex: the firmware task and each session
//! serialize their register access through it, which is the mutual-exclusion
//! contract the core expects.
//!
//! ## Usage
//!
//! ```text
//! wms-diag [--port N] [--firmware] [--debug]
//!
//! # then, from another terminal:
//! telnet localhost 8888
//! listen
//! d0? d4?
//! ```

mod firmware;

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use wms_core::monitor::Session;
use wms_core::Board;

/// Default diagnostic port (the WMS GUI client's default).
const DEFAULT_PORT: u16 = 8888;

/// Lock the shared board, recovering the data from a poisoned mutex (a
/// panicked session must not take the simulator down with it).
pub(crate) fn lock(board: &Arc<Mutex<Board>>) -> MutexGuard<'_, Board> {
    board.lock().unwrap_or_else(|e| e.into_inner())
}

fn main() {
    let mut port = DEFAULT_PORT;
    let mut run_firmware = false;
    let mut debug = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" | "-p" => match args.next().map(|v| v.parse::<u16>()) {
                Some(Ok(p)) => port = p,
                _ => {
                    eprintln!("--port requires a number");
                    std::process::exit(2);
                }
            },
            "--firmware" => run_firmware = true,
            "--debug" => debug = true,
            "--help" | "-h" => {
                eprintln!("Usage: wms-diag [--port N] [--firmware] [--debug]");
                eprintln!("  --port N     listen port (default {})", DEFAULT_PORT);
                eprintln!("  --firmware   run the demo washing-machine firmware task");
                eprintln!("  --debug      log every rejected/traced token");
                return;
            }
            other => {
                eprintln!("Unknown option: {}", other);
                std::process::exit(2);
            }
        }
    }

    let mut logger = env_logger::Builder::from_default_env();
    if debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let board = Arc::new(Mutex::new(Board::new()));

    if run_firmware {
        let b = Arc::clone(&board);
        thread::spawn(move || firmware::run(b));
    }

    // Simulated console (firmware USART output and `p` prints) goes to stdout
    {
        let b = Arc::clone(&board);
        thread::spawn(move || loop {
            thread::sleep(Duration::from_millis(100));
            let out = lock(&b).take_console_output();
            if !out.is_empty() {
                print!("{}", String::from_utf8_lossy(&out));
                let _ = std::io::stdout().flush();
            }
        });
    }

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Cannot bind 127.0.0.1:{}: {}", port, e);
            std::process::exit(1);
        }
    };
    log::info!("diagnostic monitor listening on 127.0.0.1:{}", port);

    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let b = Arc::clone(&board);
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, b) {
                        log::warn!("session ended with I/O error: {}", e);
                    }
                });
            }
            Err(e) => log::warn!("accept failed: {}", e),
        }
    }
}

/// Run one diagnostic session over one connection.
fn handle_client(mut stream: TcpStream, board: Arc<Mutex<Board>>) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    log::info!("diagnostic client connected from {}", peer);
    stream.set_nodelay(true)?;
    // short read timeout so firmware-driven notifications flush promptly
    stream.set_read_timeout(Some(Duration::from_millis(50)))?;

    let mut session = Session::new(&mut lock(&board));
    let mut iac_skip = 0usize;
    let mut buf = [0u8; 256];

    loop {
        session.pump();
        flush_lines(&mut stream, &mut session)?;

        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let cooked = cook_input(&mut stream, &buf[..n], &mut iac_skip, session.echo)?;
                session.feed(&mut lock(&board), &cooked);
                flush_lines(&mut stream, &mut session)?;
                if session.halted {
                    log::info!("halt received from {}", peer);
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    log::info!("diagnostic client {} disconnected", peer);
    Ok(())
}

/// Write queued reply/notification lines, one CRLF-terminated write each so
/// a line can never be split by interleaved traffic.
fn flush_lines(stream: &mut TcpStream, session: &mut Session) -> std::io::Result<()> {
    for line in session.take_output() {
        let mut framed = line.into_bytes();
        framed.extend_from_slice(b"\r\n");
        stream.write_all(&framed)?;
    }
    stream.flush()
}

/// Pre-process raw transport bytes for the monitor.
///
/// Telnet IAC sequences (0xFF + two option bytes, possibly straddling
/// reads) are stripped. When echo is enabled, input characters are echoed
/// back and backspace/DEL rubs out the echo; edited bytes are also dropped
/// from the monitor feed. Editing is best-effort: bytes from earlier reads
/// have already been executed.
fn cook_input(
    stream: &mut TcpStream,
    raw: &[u8],
    iac_skip: &mut usize,
    echo: bool,
) -> std::io::Result<Vec<u8>> {
    let mut cooked = Vec::with_capacity(raw.len());
    let mut echoed = Vec::new();
    for &b in raw {
        if *iac_skip > 0 {
            *iac_skip -= 1;
            continue;
        }
        if b == 0xFF {
            *iac_skip = 2;
            continue;
        }
        match b {
            0x08 | 0x7F => {
                if echo {
                    echoed.extend_from_slice(b"\x08 \x08");
                }
                cooked.pop();
            }
            b'\r' | b'\n' => {
                if echo {
                    echoed.extend_from_slice(b"\r\n");
                }
                cooked.push(b' ');
            }
            _ => {
                if echo {
                    echoed.push(b);
                }
                cooked.push(b);
            }
        }
    }
    if !echoed.is_empty() {
        stream.write_all(&echoed)?;
    }
    Ok(cooked)
}
