//! Diagnostic command monitor.
//!
//! Consumes the raw diagnostic byte stream with no line framing: tokens are
//! whitespace-delimited and executed the instant their trailing delimiter
//! arrives, so several commands may share one network read and one command
//! may straddle several. Letters are case-insensitive.
//!
//! Wire grammar:
//!
//! | Token                           | Meaning                               |
//! |---------------------------------|---------------------------------------|
//! | `echo` / `noecho`               | enable / disable transport echo       |
//! | `halt`                          | stop the simulated CPU                |
//! | `reset`                         | reset board and session state         |
//! | `listen`                        | enable change notifications (one-way) |
//! | `p<string>`                     | print the string to the sim console   |
//! | `<B\|D\|U><0-9><act>[<hex>]`    | register query (act = `? = s r t \| & ^`) |
//! | `m<hex-addr><act>[<hex>]`       | raw memory query, same action set     |
//! | `<B\|D><p\|l\|d><hex-pin>`      | input pin push / latch / drop         |
//!
//! Replies: a `?` read answers with exactly 8 zero-padded lowercase hex
//! digits; successful mutations are silent. Any malformed or out-of-range
//! token is echoed back verbatim between `?` characters and parsing resumes
//! at the next token — one bad command never poisons the rest of the line.
//! While listening, `+D<n>` / `-D<n>` notification lines interleave with
//! replies on the same stream.

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;

use crate::action::BitAction;
use crate::bus::{Device, RegisterFile, Target};
use crate::error::{DiagError, Result};
use crate::notify::OdrWatch;
use crate::Board;

/// Per-connection diagnostic session: the command tokenizer/dispatcher plus
/// the session flags and notification state.
///
/// A session holds no locks; callers pass the board into [`Session::feed`],
/// which lets embedders serialize diagnostic traffic against concurrent
/// firmware execution however they like.
pub struct Session {
    /// Transport should echo input characters (with backspace editing)
    pub echo: bool,
    /// Output-register change notifications enabled. One-way: there is no
    /// `unlisten`; the flag lives until the connection does.
    pub listen: bool,
    /// A `halt` command was processed on this session
    pub halted: bool,
    /// Partial token carried across reads
    token: String,
    /// Completed reply/notification lines awaiting the transport
    out: VecDeque<String>,
    /// Committed GPIOD ODR values from the board
    odr_rx: Receiver<u32>,
    /// Last-observed ODR value for transition detection
    watch: OdrWatch,
}

impl Session {
    /// Open a session against the board: flags start cleared, the
    /// notification baseline is the current output value.
    pub fn new(board: &mut Board) -> Self {
        let odr_rx = board.watch_odr();
        Session {
            echo: false,
            listen: false,
            halted: false,
            token: String::new(),
            out: VecDeque::new(),
            odr_rx,
            watch: OdrWatch::new(board.odr()),
        }
    }

    /// Consume raw input bytes, executing every token completed by them.
    ///
    /// Pending output-register commits are folded in before the first token
    /// and after each one, so notifications keep their order relative to the
    /// replies of the commands that caused them.
    pub fn feed(&mut self, board: &mut Board, bytes: &[u8]) {
        self.pump();
        for &b in bytes {
            if b.is_ascii_whitespace() {
                if !self.token.is_empty() {
                    let token = std::mem::take(&mut self.token);
                    self.dispatch(board, &token);
                    self.pump();
                }
            } else {
                self.token.push(b as char);
            }
        }
    }

    /// Fold committed ODR writes into notification lines (listening) or
    /// just the last-observed baseline (silent). Transports call this
    /// periodically so firmware-driven changes surface without input.
    pub fn pump(&mut self) {
        while let Ok(value) = self.odr_rx.try_recv() {
            if self.listen {
                self.watch.observe(value, &mut self.out);
            } else {
                self.watch.track(value);
            }
        }
    }

    /// True if a reply or notification line is waiting.
    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }

    /// Drain queued lines. Each is one complete reply or notification; the
    /// transport appends its own line terminator and must write each whole.
    pub fn take_output(&mut self) -> Vec<String> {
        self.out.drain(..).collect()
    }

    /// Execute one complete token. Faults become the `?<token>?` reply.
    fn dispatch(&mut self, board: &mut Board, token: &str) {
        match self.exec(board, token) {
            Ok(Some(reply)) => self.out.push_back(reply),
            Ok(None) => {}
            Err(err) => {
                log::debug!("rejected token {:?}: {}", token, err);
                self.out.push_back(format!("?{}?", token));
            }
        }
    }

    fn exec(&mut self, board: &mut Board, token: &str) -> Result<Option<String>> {
        let lower = token.to_ascii_lowercase();
        match lower.as_str() {
            "echo" => {
                self.echo = true;
                return Ok(None);
            }
            "noecho" => {
                self.echo = false;
                return Ok(None);
            }
            "halt" => {
                self.halted = true;
                board.halt();
                return Ok(None);
            }
            "reset" => {
                self.do_reset(board);
                return Ok(None);
            }
            "listen" => {
                // baseline is already current: feed() pumped before us
                self.listen = true;
                return Ok(None);
            }
            _ => {}
        }

        let bytes = lower.as_bytes();
        match bytes[0] {
            // print: everything after the `p`, original case preserved
            b'p' if token.len() > 1 => {
                board.console_write(&token[1..]);
                Ok(None)
            }
            b'b' | b'd' | b'u' => self.exec_device(board, &lower),
            b'm' => self.exec_memory(board, &lower),
            _ => Err(DiagError::Malformed),
        }
    }

    /// GPIO/USART register query or input-pin action.
    fn exec_device(&mut self, board: &mut Board, lower: &str) -> Result<Option<String>> {
        let bytes = lower.as_bytes();
        let device = Device::from_char(bytes[0] as char).ok_or(DiagError::Malformed)?;
        let second = *bytes.get(1).ok_or(DiagError::Malformed)?;
        match second {
            // register indices are decimal digits, so `d` below stays
            // unambiguous as the drop action
            b'0'..=b'9' => {
                let index = second - b'0';
                RegisterFile::check_register(device, index)?;
                let action = *bytes.get(2).ok_or(DiagError::Malformed)?;
                let action = BitAction::from_char(action as char).ok_or(DiagError::Malformed)?;
                self.apply(board, Target::Register(device, index), action, &lower[3..])
            }
            b'p' | b'l' | b'd' if device != Device::Usart3 => {
                let pin_str = &lower[2..];
                if pin_str.is_empty() {
                    return Err(DiagError::MissingParam);
                }
                let pin = parse_hex(pin_str)?;
                match second {
                    b'p' => board.push_pin(device, pin)?,
                    b'l' => board.latch_pin(device, pin)?,
                    _ => board.drop_pin(device, pin)?,
                }
                Ok(None)
            }
            _ => Err(DiagError::Malformed),
        }
    }

    /// Raw memory query: `m<hex-addr><action>[<hex-param>]`.
    fn exec_memory(&mut self, board: &mut Board, lower: &str) -> Result<Option<String>> {
        let rest = &lower[1..];
        let addr_len = rest
            .bytes()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        if addr_len == 0 {
            return Err(DiagError::Malformed);
        }
        let addr = parse_hex(&rest[..addr_len])?;
        let target = RegisterFile::resolve_addr(addr)?;
        let mut tail = rest[addr_len..].chars();
        let action = tail.next().ok_or(DiagError::Malformed)?;
        let action = BitAction::from_char(action).ok_or(DiagError::Malformed)?;
        self.apply(board, target, action, tail.as_str())
    }

    /// Validate the parameter, run the bit-action, and commit or reply.
    fn apply(
        &mut self,
        board: &mut Board,
        target: Target,
        action: BitAction,
        param_str: &str,
    ) -> Result<Option<String>> {
        let param = if param_str.is_empty() {
            if action.wants_param() {
                return Err(DiagError::MissingParam);
            }
            0
        } else {
            if !action.wants_param() {
                return Err(DiagError::UnexpectedParam);
            }
            parse_hex(param_str)?
        };

        if action.mutates() && RegisterFile::is_read_only(target) {
            return Err(DiagError::ReadOnly("IDR"));
        }

        let current = board.read_word(target);
        let next = action.apply(current, param)?;
        if action.mutates() {
            board.write_word(target, next);
            Ok(None)
        } else {
            Ok(Some(format!("{:08x}", current)))
        }
    }

    /// `reset`: board back to power-on state, session flags cleared, and the
    /// notification baseline re-seeded so the reset transition itself never
    /// reports.
    fn do_reset(&mut self, board: &mut Board) {
        board.reset();
        self.echo = false;
        self.listen = false;
        self.halted = false;
        // discard commits from before the reset, then adopt the zeroed ODR
        while self.odr_rx.try_recv().is_ok() {}
        self.watch.reseed(board.odr());
    }
}

/// Parse a hex field (lowercased token slice) into a u32.
fn parse_hex(s: &str) -> Result<u32> {
    u32::from_str_radix(s, 16).map_err(|_| DiagError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::GPIO_ODR;
    use crate::{GPIOD_BASE, RCC_AHB1ENR};

    fn setup() -> (Board, Session) {
        let mut board = Board::new();
        let session = Session::new(&mut board);
        (board, session)
    }

    fn run(board: &mut Board, session: &mut Session, input: &str) -> Vec<String> {
        session.feed(board, input.as_bytes());
        session.take_output()
    }

    #[test]
    fn test_assign_then_read() {
        let (mut board, mut session) = setup();
        let out = run(&mut board, &mut session, "d5=12345678 d5? ");
        assert_eq!(out, vec!["12345678"]);
    }

    #[test]
    fn test_read_is_zero_padded_hex() {
        let (mut board, mut session) = setup();
        assert_eq!(run(&mut board, &mut session, "d5=a d5? "), vec!["0000000a"]);
    }

    #[test]
    fn test_set_reset_bit_roundtrip() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "d5=a5a50000 ");
        let before = run(&mut board, &mut session, "d5? ");
        run(&mut board, &mut session, "d5s3 ");
        assert_eq!(run(&mut board, &mut session, "d5? "), vec!["a5a50008"]);
        run(&mut board, &mut session, "d5r3 ");
        assert_eq!(run(&mut board, &mut session, "d5? "), before);
    }

    #[test]
    fn test_toggle_twice_is_identity() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "d5=f0f0 d5t7 d5t7 ");
        assert_eq!(run(&mut board, &mut session, "d5? "), vec!["0000f0f0"]);
    }

    #[test]
    fn test_or_then_andnot_clears_exactly_mask() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "d5=12345678 d5|ff0 d5&ff0 ");
        assert_eq!(run(&mut board, &mut session, "d5? "), vec!["12345008"]);
    }

    #[test]
    fn test_commands_split_across_reads() {
        let (mut board, mut session) = setup();
        session.feed(&mut board, b"d5=c0");
        assert!(!session.has_output());
        session.feed(&mut board, b"ffee d5");
        assert!(!session.has_output());
        session.feed(&mut board, b"? ");
        assert_eq!(session.take_output(), vec!["c0ffee"]);
    }

    #[test]
    fn test_multiple_commands_one_line() {
        let (mut board, mut session) = setup();
        let out = run(&mut board, &mut session, "d5=1 d5s1 d5? ");
        assert_eq!(out, vec!["00000003"]);
    }

    #[test]
    fn test_case_insensitive() {
        let (mut board, mut session) = setup();
        let out = run(&mut board, &mut session, "D5=AB D5? ");
        assert_eq!(out, vec!["000000ab"]);
    }

    #[test]
    fn test_malformed_token_is_local() {
        let (mut board, mut session) = setup();
        let out = run(&mut board, &mut session, "Z9? D0? ");
        assert_eq!(out, vec!["?Z9??", "00000000"]);
    }

    #[test]
    fn test_out_of_range_register() {
        let (mut board, mut session) = setup();
        assert_eq!(run(&mut board, &mut session, "u7? "), vec!["?u7??"]);
        // all ten GPIO registers exist
        assert_eq!(run(&mut board, &mut session, "b9? "), vec!["00000000"]);
    }

    #[test]
    fn test_missing_and_unexpected_params() {
        let (mut board, mut session) = setup();
        assert_eq!(run(&mut board, &mut session, "d5= "), vec!["?d5=?"]);
        assert_eq!(run(&mut board, &mut session, "d5?1 "), vec!["?d5?1?"]);
        assert_eq!(run(&mut board, &mut session, "d5s20 "), vec!["?d5s20?"]);
    }

    #[test]
    fn test_idr_rejects_writes() {
        let (mut board, mut session) = setup();
        assert_eq!(run(&mut board, &mut session, "d4=ff "), vec!["?d4=ff?"]);
        assert_eq!(run(&mut board, &mut session, "d4? "), vec!["00000000"]);
    }

    #[test]
    fn test_latched_pin_until_drop() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "dl0 ");
        assert_eq!(run(&mut board, &mut session, "d4? "), vec!["00000001"]);
        assert_eq!(run(&mut board, &mut session, "d4? "), vec!["00000001"]);
        run(&mut board, &mut session, "dd0 ");
        assert_eq!(run(&mut board, &mut session, "d4? "), vec!["00000000"]);
    }

    #[test]
    fn test_push_then_drop() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "dp6 ");
        assert_eq!(run(&mut board, &mut session, "d4? "), vec!["00000040"]);
        run(&mut board, &mut session, "dd6 ");
        assert_eq!(run(&mut board, &mut session, "d4? "), vec!["00000000"]);
    }

    #[test]
    fn test_pin_on_usart_is_malformed() {
        let (mut board, mut session) = setup();
        assert_eq!(run(&mut board, &mut session, "up1 "), vec!["?up1?"]);
    }

    #[test]
    fn test_pin_index_out_of_range() {
        let (mut board, mut session) = setup();
        assert_eq!(run(&mut board, &mut session, "dp10 "), vec!["?dp10?"]);
        // 0xf is the last pin of the port
        assert!(run(&mut board, &mut session, "dpf ").is_empty());
    }

    #[test]
    fn test_listen_reports_transitions() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "listen ");
        assert_eq!(run(&mut board, &mut session, "d5s3 "), vec!["+D3"]);
        assert_eq!(run(&mut board, &mut session, "d5r3 "), vec!["-D3"]);
        // rewriting the same value is silent
        assert!(run(&mut board, &mut session, "d5=0 ").is_empty());
    }

    #[test]
    fn test_silent_session_never_notifies() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "d5s3 d5r3 ");
        assert!(!session.has_output());
    }

    #[test]
    fn test_notification_index_is_decimal() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "listen ");
        assert_eq!(run(&mut board, &mut session, "d5sc "), vec!["+D12"]);
    }

    #[test]
    fn test_firmware_writes_notify_too() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "listen ");
        board.write_addr(GPIOD_BASE + 0x14, 1 << 9).unwrap();
        session.pump();
        assert_eq!(session.take_output(), vec!["+D9"]);
    }

    #[test]
    fn test_push_alone_does_not_notify() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "listen ");
        assert!(run(&mut board, &mut session, "dp0 ").is_empty());
    }

    #[test]
    fn test_memory_query_roundtrip() {
        let (mut board, mut session) = setup();
        let out = run(&mut board, &mut session, "m40023830=8 m40023830? ");
        assert_eq!(out, vec!["00000008"]);
        assert_eq!(board.read_addr(RCC_AHB1ENR).unwrap(), 8);
    }

    #[test]
    fn test_memory_aliases_register_window() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "m40020c14=5 ");
        assert_eq!(run(&mut board, &mut session, "d5? "), vec!["00000005"]);
        assert_eq!(board.bus.gpio_d.regs[GPIO_ODR as usize], 5);
    }

    #[test]
    fn test_memory_faults() {
        let (mut board, mut session) = setup();
        assert_eq!(run(&mut board, &mut session, "m123? "), vec!["?m123??"]);
        assert_eq!(
            run(&mut board, &mut session, "m40023831? "),
            vec!["?m40023831??"]
        );
        assert_eq!(run(&mut board, &mut session, "m? "), vec!["?m??"]);
    }

    #[test]
    fn test_echo_and_noecho_flags() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "echo ");
        assert!(session.echo);
        run(&mut board, &mut session, "noecho ");
        assert!(!session.echo);
    }

    #[test]
    fn test_halt_sets_flags() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "halt ");
        assert!(session.halted);
        assert!(board.halted);
    }

    #[test]
    fn test_print_preserves_case() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "pHello ");
        assert_eq!(board.take_console_output(), b"Hello\n");
        // bare `p` has nothing to print
        assert_eq!(run(&mut board, &mut session, "p "), vec!["?p?"]);
    }

    #[test]
    fn test_reset_clears_session_and_reports_nothing() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "echo listen d5s3 ");
        session.take_output();
        session.feed(&mut board, b"dl1 reset ");
        assert!(!session.echo);
        assert!(!session.listen);
        assert!(!session.halted);
        // the 1→0 output transition of the reset itself is not reported
        assert!(!session.has_output());
        assert_eq!(run(&mut board, &mut session, "d4? "), vec!["00000000"]);
    }

    #[test]
    fn test_listen_baseline_is_current_value() {
        let (mut board, mut session) = setup();
        run(&mut board, &mut session, "d5s3 listen d5s3 ");
        // the pre-listen write set bit 3; re-setting it afterwards is no change
        assert!(!session.has_output());
        assert_eq!(run(&mut board, &mut session, "d5r3 "), vec!["-D3"]);
    }
}
