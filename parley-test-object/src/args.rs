use std::{ffi::OsString, path::PathBuf};

use clap::Parser;

/// Parley bus test object
#[derive(Parser, Debug, Default)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Bus socket path. Uses $PARLEY_BUS_SOCKET or the system bus socket if not set
    #[clap(short, long, value_parser)]
    pub socket: Option<PathBuf>,

    /// Accepted for command line compatibility. Has no effect
    #[clap(short = 'c', hide = true)]
    pub compat: bool,
}

impl Args {
    /// Parse command line `args`, skipping options the tool doesn't know.
    ///
    /// Short options may be clustered (`-cs <path>`, `-s<path>`). Unknown
    /// options and positional arguments never consume the socket path
    pub fn parse_known<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut args = args.into_iter().map(Into::into);
        let mut known: Vec<OsString> = args.next().into_iter().collect();
        let mut socket = None;
        let mut compat = false;

        while let Some(arg) = args.next() {
            // Non UTF-8 tokens can only be option values
            let Some(text) = arg.to_str() else {
                continue;
            };

            match text {
                "-s" | "--socket" => socket = args.next().or(socket),
                "-h" | "--help" | "-V" | "--version" => known.push(text.into()),
                _ if text.starts_with("--socket=") => {
                    socket = Some(text["--socket=".len()..].into())
                }
                _ if text.starts_with("--") => {}
                _ if text.starts_with('-') => {
                    for (index, option) in text.char_indices().skip(1) {
                        match option {
                            'c' => compat = true,
                            's' => {
                                let attached = &text[index + 1..];
                                if attached.is_empty() {
                                    socket = args.next().or(socket);
                                } else {
                                    socket = Some(attached.into());
                                }
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        if compat {
            known.push("-c".into());
        }
        if let Some(path) = socket {
            known.push(socket_arg(path));
        }

        Self::parse_from(known)
    }
}

/// `--socket=<path>` keeps paths starting with a dash from being taken as options
fn socket_arg(path: OsString) -> OsString {
    let mut arg = OsString::from("--socket=");
    arg.push(path);
    arg
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn command_line<'a>(args: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
        std::iter::once("parley-test-object").chain(args.iter().copied())
    }

    #[rstest]
    #[case::short(&["-s", "/tmp/a"])]
    #[case::long(&["--socket", "/tmp/a"])]
    #[case::long_attached(&["--socket=/tmp/a"])]
    #[case::short_attached(&["-s/tmp/a"])]
    #[case::compat_flag_first(&["-c", "-s", "/tmp/a"])]
    #[case::clustered(&["-cs", "/tmp/a"])]
    #[case::unknown_flag_first(&["-x", "-s", "/tmp/a"])]
    #[case::unknown_long_flag_last(&["-s", "/tmp/a", "--verbose"])]
    #[case::positional(&["extra", "-s", "/tmp/a", "more"])]
    fn test_socket_path(#[case] args: &[&str]) {
        let args = Args::parse_known(command_line(args));
        assert_eq!(args.socket, Some(PathBuf::from("/tmp/a")));
    }

    #[test]
    fn test_dash_path() {
        let args = Args::parse_known(["parley-test-object", "-s", "-bus.socket"]);
        assert_eq!(args.socket, Some(PathBuf::from("-bus.socket")));
    }

    #[rstest]
    #[case::no_args(&[])]
    #[case::unknown_flags(&["-x", "--verbose", "-c"])]
    #[case::missing_value(&["-s"])]
    fn test_default_socket(#[case] args: &[&str]) {
        let args = Args::parse_known(command_line(args));
        assert_eq!(args.socket, None);
    }

    #[test]
    fn test_last_socket_wins() {
        let args = Args::parse_known(["parley-test-object", "-s", "/tmp/a", "-s", "/tmp/b"]);
        assert_eq!(args.socket, Some(PathBuf::from("/tmp/b")));
    }
}
