/// Global arguments provided at process start
#[derive(Debug, Default)]
pub struct GlobalArgs {
    /// Path of the wayland socket. If not set, a socket in `XDG_RUNTIME_DIR` is used
    pub socket_path: Option<String>,
    /// Path of the log file. If not set, logs are written to stderr
    pub log_file: Option<String>,
}

impl GlobalArgs {
    /// Parse global arguments. `None` indicates that the program should exit.
    ///
    /// The first item is expected to be the program name and is skipped.
    pub fn parse(args: impl Iterator<Item = String>) -> Option<Self> {
        let mut global_args = Self::default();
        let mut args = args.skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => {
                    print_help();
                    return None;
                }
                "--socket-path" => global_args.socket_path = Some(value_for(&arg, args.next())?),
                "--log-file" => global_args.log_file = Some(value_for(&arg, args.next())?),
                unknown => {
                    eprintln!("Unknown argument: {unknown}");
                    print_help();
                    return None;
                }
            }
        }

        Some(global_args)
    }
}

fn value_for(flag: &str, value: Option<String>) -> Option<String> {
    if value.is_none() {
        eprintln!("Missing value for {flag}");
        print_help();
    }
    value
}

fn print_help() {
    println!("Usage: swatch [OPTIONS]");
    println!("Options:");
    println!("  --socket-path <PATH>  Path of the wayland socket to listen on");
    println!("  --log-file <PATH>     Append logs to this file instead of stderr");
    println!("  -h, --help            Print this help message and exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Option<GlobalArgs> {
        GlobalArgs::parse(
            std::iter::once("swatch")
                .chain(args.iter().copied())
                .map(String::from),
        )
    }

    #[test]
    fn no_arguments_uses_defaults() {
        let args = parse(&[]).unwrap();
        assert!(args.socket_path.is_none());
        assert!(args.log_file.is_none());
    }

    #[test]
    fn socket_path_and_log_file_are_parsed() {
        let args = parse(&["--socket-path", "/tmp/wayland-swatch", "--log-file", "swatch.log"])
            .unwrap();
        assert_eq!(args.socket_path.as_deref(), Some("/tmp/wayland-swatch"));
        assert_eq!(args.log_file.as_deref(), Some("swatch.log"));
    }

    #[test]
    fn help_exits() {
        assert!(parse(&["--help"]).is_none());
        assert!(parse(&["--socket-path", "/tmp/x", "-h"]).is_none());
    }

    #[test]
    fn missing_value_exits() {
        assert!(parse(&["--log-file"]).is_none());
    }

    #[test]
    fn unknown_argument_exits() {
        assert!(parse(&["--frobnicate"]).is_none());
    }
}
