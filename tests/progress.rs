use approx::assert_abs_diff_eq;
use remix_core::io::progress::{parse_progress_line, LineBuffer};

#[test]
fn plain_pair_is_a_fraction() {
    assert_abs_diff_eq!(parse_progress_line("50/200").unwrap(), 0.25, epsilon = 1e-12);
    assert_abs_diff_eq!(
        parse_progress_line("Separating track 3/4 now").unwrap(),
        0.75,
        epsilon = 1e-12
    );
}

#[test]
fn progress_bar_line_uses_first_pair() {
    let line = " 45%|██████▌        | 12.0/40.0 [00:03<00:07,  2.31seconds/s]";
    assert_abs_diff_eq!(parse_progress_line(line).unwrap(), 0.3, epsilon = 1e-12);
}

#[test]
fn units_around_numbers_are_ignored() {
    assert_abs_diff_eq!(parse_progress_line("(3s/6s)").unwrap(), 0.5, epsilon = 1e-12);
}

#[test]
fn lines_without_usable_pair_are_skipped() {
    assert_eq!(parse_progress_line("loading model htdemucs_6s"), None);
    assert_eq!(parse_progress_line("0/0"), None);
    assert_eq!(parse_progress_line("and/or"), None);
    assert_eq!(parse_progress_line(""), None);
}

#[test]
fn overshoot_is_clamped() {
    assert_eq!(parse_progress_line("7/5"), Some(1.0));
}

#[test]
fn line_buffer_splits_on_newline_and_carriage_return() {
    let mut buf = LineBuffer::new();
    assert_eq!(buf.feed(b"1/4\r2/"), vec!["1/4"]);
    assert_eq!(buf.feed(b"4\r\n3/4"), vec!["2/4"]);
    assert!(buf.feed(b"").is_empty());
    assert_eq!(buf.finish(), Some("3/4".to_string()));
    assert_eq!(buf.finish(), None);
}
