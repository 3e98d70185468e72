//! Whitelist compilation and seccomp installation.
//!
//! The whitelist file names one syscall per line, by name (resolved
//! against the table in `judgebox-sys`) or by raw number. Blank lines and
//! `#` comments are ignored. The compiled BPF program allows exactly the
//! listed syscalls and kills the process on anything else.
//!
//! [`install_from`] runs in the child, after the privilege drop and before
//! `execve`; it fully consumes and closes the whitelist fd the child
//! opened while it could still see the host filesystem.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};

use rustix::io::Errno;
use thiserror::Error;

use judgebox_sys::seccomp::{
    build_whitelist_filter, seccomp_set_mode_filter, SockFprog, MAX_WHITELIST_SIZE,
};
use judgebox_sys::syscalls;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("whitelist read: {0}")]
    Read(#[from] io::Error),

    #[error("whitelist line {line}: unknown syscall {name:?}")]
    UnknownSyscall { name: String, line: usize },

    #[error("whitelist too large: {0} entries (max {MAX_WHITELIST_SIZE})")]
    TooLarge(usize),

    #[error("empty whitelist")]
    Empty,

    #[error("seccomp install: {0}")]
    Install(Errno),
}

/// Parses a whitelist into syscall numbers, deduplicated, in file order.
pub fn parse_whitelist(reader: impl Read) -> Result<Vec<i64>, FilterError> {
    let mut numbers = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let nr = match entry.parse::<i64>() {
            Ok(nr) => nr,
            Err(_) => {
                syscalls::resolve(entry).ok_or_else(|| FilterError::UnknownSyscall {
                    name: entry.to_string(),
                    line: index + 1,
                })?
            }
        };
        if !numbers.contains(&nr) {
            numbers.push(nr);
        }
    }
    if numbers.is_empty() {
        return Err(FilterError::Empty);
    }
    if numbers.len() > MAX_WHITELIST_SIZE {
        return Err(FilterError::TooLarge(numbers.len()));
    }
    Ok(numbers)
}

/// Compiles the whitelist and applies the filter to the calling thread.
///
/// Everything not on the list gets `SECCOMP_RET_KILL_PROCESS`, so a
/// confined program that strays dies with SIGSYS. The file is fully
/// consumed and closed before this returns.
pub fn install_from(whitelist: File) -> Result<(), FilterError> {
    let numbers = parse_whitelist(whitelist)?;
    let filter = build_whitelist_filter(&numbers);
    let fprog = SockFprog {
        len: filter.len() as u16,
        filter: filter.as_ptr(),
    };
    // SAFETY: fprog points at a live, well-formed program.
    unsafe { seccomp_set_mode_filter(&fprog) }.map_err(FilterError::Install)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_names_and_numbers() {
        let input = "read\nwrite\n60\nexit_group\n";
        let numbers = parse_whitelist(Cursor::new(input)).unwrap();
        assert_eq!(
            numbers,
            vec![libc::SYS_read, libc::SYS_write, 60, libc::SYS_exit_group]
        );
    }

    #[test]
    fn skips_comments_and_blanks() {
        let input = "# stdio\nread\n\n  \nwrite\n# the end\n";
        let numbers = parse_whitelist(Cursor::new(input)).unwrap();
        assert_eq!(numbers, vec![libc::SYS_read, libc::SYS_write]);
    }

    #[test]
    fn deduplicates_entries() {
        let input = "read\nread\n0\n";
        let numbers = parse_whitelist(Cursor::new(input)).unwrap();
        assert_eq!(numbers, vec![libc::SYS_read]);
    }

    #[test]
    fn unknown_name_is_an_error_with_line_number() {
        let input = "read\nfrobnicate\n";
        match parse_whitelist(Cursor::new(input)) {
            Err(FilterError::UnknownSyscall { name, line }) => {
                assert_eq!(name, "frobnicate");
                assert_eq!(line, 2);
            }
            other => panic!("expected UnknownSyscall, got {other:?}"),
        }
    }

    #[test]
    fn empty_whitelist_is_an_error() {
        assert!(matches!(
            parse_whitelist(Cursor::new("# nothing\n")),
            Err(FilterError::Empty)
        ));
    }

    #[test]
    fn oversized_whitelist_is_an_error() {
        let input: String = (0..300).map(|i| format!("{i}\n")).collect();
        assert!(matches!(
            parse_whitelist(Cursor::new(input)),
            Err(FilterError::TooLarge(300))
        ));
    }
}
