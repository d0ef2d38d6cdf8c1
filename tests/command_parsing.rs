// Stream-level tests for the decoder and state machine through the public API

use escpos_emulator::protocol::{Alignment, CutMode, PrintMode};
use escpos_emulator::{CommandKind, CommandParser, CommandType, ContentType, PrinterState};
use pretty_assertions::assert_eq;

fn run(bytes: &[u8]) -> PrinterState {
    let mut parser = CommandParser::default();
    let mut state = PrinterState::default();
    for command in parser.feed(bytes) {
        state.update(command);
    }
    state
}

#[test]
fn test_text_with_formatting() {
    let mut parser = CommandParser::default();
    let commands = parser.feed(b"\x1B\x40\x1B\x21\x08Bold\x1B\x21\x00Normal");
    let kinds: Vec<_> = commands.into_iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            CommandKind::Initialize,
            CommandKind::PrintMode(PrintMode {
                bold: true,
                ..PrintMode::default()
            }),
            CommandKind::Text { text: "Bold".into() },
            CommandKind::PrintMode(PrintMode::default()),
            CommandKind::Text { text: "Normal".into() },
        ]
    );
}

#[test]
fn test_receipt_byte_by_byte() {
    let receipt = b"\x1B\x40\x1B\x61\x01Total: 42\n\x1D\x6B\x49\x0512345\x1D\x56\x42";

    let mut whole = CommandParser::default();
    let expected: Vec<_> = whole.feed(receipt).into_iter().map(|c| c.raw_data).collect();

    // One byte per read, like a slow serial bridge. Text runs split too,
    // so compare everything but text.
    let mut parser = CommandParser::default();
    let mut got = Vec::new();
    for byte in receipt {
        got.extend(parser.feed(&[*byte]));
    }
    let non_text = |raw: &Vec<u8>| !raw.is_empty() && matches!(raw[0], 0x1B | 0x1D | 0x0A);
    let got_raw: Vec<_> = got
        .iter()
        .map(|c| c.raw_data.clone())
        .filter(non_text)
        .collect();
    let expected_raw: Vec<_> = expected.into_iter().filter(non_text).collect();
    assert_eq!(got_raw, expected_raw);

    let text: Vec<u8> = got
        .iter()
        .filter(|c| c.command_type == CommandType::Text)
        .flat_map(|c| c.raw_data.clone())
        .collect();
    assert_eq!(text, b"Total: 42");
}

#[test]
fn test_example_receipt_history() {
    let state = run(b"\x1B\x40\x1B\x21\x08Hi\n\x1D\x56\x41");

    let log = state.command_log();
    assert_eq!(log.len(), 5);
    assert_eq!(log[1].kind, CommandKind::PrintMode(PrintMode { bold: true, ..PrintMode::default() }));
    assert_eq!(log[4].kind, CommandKind::Cut { mode: CutMode::Partial });

    let last = state.print_history().last().expect("cut produces a job");
    assert_eq!(last.content_type, ContentType::Text);
    assert_eq!(last.text(), "Hi");
    assert_eq!(state.status().buffer_size, 0);
}

#[test]
fn test_alignment_then_text() {
    let state = run(b"\x1B\x61\x02right");
    assert_eq!(
        state.command_log()[0].kind,
        CommandKind::Alignment {
            alignment: Alignment::Right
        }
    );
    assert_eq!(state.print_history().len(), 1);
}

#[test]
fn test_cut_variants_all_flush() {
    for cut in [&b"\x1B\x69"[..], &b"\x1B\x6D"[..], &b"\x1D\x56\x41"[..], &b"\x1D\x56\x42"[..]] {
        let mut bytes = b"line".to_vec();
        bytes.extend_from_slice(cut);
        let state = run(&bytes);
        assert_eq!(state.status().buffer_size, 0, "cut {:02X?}", cut);
        assert_eq!(state.print_history().last().map(|j| j.data.clone()), Some(b"line".to_vec()));
    }
}

#[test]
fn test_unknown_commands_are_dropped() {
    let state = run(b"\x1B\x45\x01A\x1D\x42\x01B");
    let types: Vec<_> = state.command_log().iter().map(|c| c.command_type).collect();
    // ESC E and GS B are outside the decoded subset: selector consumed,
    // parameter byte becomes part of the following text
    assert!(types.iter().all(|t| *t == CommandType::Text));
    assert!(!types.contains(&CommandType::Unrecognized));
}
