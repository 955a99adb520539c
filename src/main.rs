//! Purpose: `feldera-client` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, builds an `api::Client`, emits JSON on stdout.
//! Invariants: Outcomes are printed as JSON on stdout; errors go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code` (4 for a conflict).
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint};
use clap_complete::aot::Shell;
use feldera_api_client::api::{
    self, Client, Error, ErrorKind, NewConnectorOutcome, NewConnectorRequest, Response, TlsMode,
    to_exit_code,
};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

const CONFLICT_EXIT_CODE: i32 = 4;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return Ok(RunOutcome::ok());
        }
        Err(err) => {
            let _ = err.print();
            return Ok(RunOutcome::with_code(to_exit_code(ErrorKind::Usage)));
        }
    };
    let color_mode = cli.color;
    dispatch(cli).map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "feldera-client",
    version,
    about = "Client for the Feldera pipeline manager REST API",
    long_about = None,
    after_help = r#"EXAMPLES
  $ feldera-client --url http://localhost:8080 connector create -f connector.json
  $ feldera-client connector create '{"name":"c","description":"","config":{...}}'
  $ feldera-client --token-file ~/.feldera/token connector create --detailed -f c.json"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        global = true,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug, Default)]
struct ConnectionArgs {
    #[arg(
        long,
        global = true,
        default_value = "http://localhost:8080",
        help = "Base URL of the pipeline manager (scheme, host, port)"
    )]
    url: String,
    #[arg(
        long,
        global = true,
        help = "Bearer token (dev-only; prefer --token-file)",
        conflicts_with = "token_file",
        help_heading = "Auth/TLS"
    )]
    token: Option<String>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Read bearer token from file",
        value_hint = ValueHint::FilePath,
        help_heading = "Auth/TLS"
    )]
    token_file: Option<PathBuf>,
    #[arg(
        long = "tls-ca",
        global = true,
        value_name = "PATH",
        help = "Trust this PEM CA/certificate",
        value_hint = ValueHint::FilePath,
        help_heading = "Auth/TLS"
    )]
    tls_ca: Option<PathBuf>,
    #[arg(
        long = "tls-skip-verify",
        global = true,
        help = "Disable TLS certificate verification (unsafe; dev-only)",
        conflicts_with = "tls_ca",
        help_heading = "Auth/TLS"
    )]
    tls_skip_verify: bool,
    #[arg(
        long,
        global = true,
        value_name = "DURATION",
        value_parser = parse_timeout,
        help = "Request timeout: 500ms, 30s, 2m, 1h, or bare seconds"
    )]
    timeout: Option<Duration>,
    #[arg(
        long = "header",
        global = true,
        value_name = "NAME:VALUE",
        value_parser = parse_header_flag,
        help = "Extra request header (repeatable; the last value of a name wins)"
    )]
    headers: Vec<(String, String)>,
    #[arg(
        long = "cookie",
        global = true,
        value_name = "NAME=VALUE",
        value_parser = parse_cookie_flag,
        help = "Cookie sent with every request (repeatable)"
    )]
    cookies: Vec<(String, String)>,
    #[arg(long, global = true, help = "Do not follow HTTP redirects")]
    no_follow_redirects: bool,
    #[arg(
        long,
        global = true,
        help = "Fail on status codes the endpoint does not document"
    )]
    raise_on_unexpected_status: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(arg_required_else_help = true, about = "Manage connectors")]
    Connector {
        #[command(subcommand)]
        command: ConnectorCommand,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConnectorCommand {
    #[command(
        about = "Create a new connector",
        long_about = r#"Create a new connector (POST /v0/connectors).

Prints {"created": {...}} on success and {"conflict": {...}} when the server
rejects the request (exit code 4). Undocumented statuses print null unless
--raise-on-unexpected-status is given."#
    )]
    Create {
        #[arg(help = "Inline JSON request body")]
        data: Option<String>,
        #[arg(
            short = 'f',
            long = "file",
            help = "Request body file (use - for stdin)",
            conflicts_with = "data",
            value_hint = ValueHint::FilePath
        )]
        file: Option<String>,
        #[arg(long, help = "Print status, headers, and raw content with the outcome")]
        detailed: bool,
    },
}

fn dispatch(cli: Cli) -> Result<RunOutcome, Error> {
    match cli.command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "feldera-client", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Connector {
            command:
                ConnectorCommand::Create {
                    data,
                    file,
                    detailed,
                },
        } => {
            let client = build_client(cli.connection)?;
            let body = read_request_body(data, file)?;
            let request: NewConnectorRequest = serde_json::from_str(&body).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid new connector request json")
                    .with_hint("Expected {\"name\", \"description\", \"config\"}.")
                    .with_source(err)
            })?;
            let response = api::new_connector_detailed(&client, &request)?;
            let exit_code = outcome_exit_code(response.parsed.as_ref());
            let value = if detailed {
                detailed_json(&response)
            } else {
                outcome_json(response.parsed.as_ref())
            };
            emit_json(&value);
            Ok(RunOutcome::with_code(exit_code))
        }
    }
}

fn build_client(args: ConnectionArgs) -> Result<Client, Error> {
    let tls = match (args.tls_ca, args.tls_skip_verify) {
        (Some(path), _) => TlsMode::CaFile(path),
        (None, true) => TlsMode::SkipVerify,
        (None, false) => TlsMode::Verify,
    };
    let mut builder = Client::builder(args.url)
        .tls(tls)
        .follow_redirects(!args.no_follow_redirects)
        .raise_on_unexpected_status(args.raise_on_unexpected_status);
    let token = match args.token_file {
        Some(path) => Some(load_token_file(&path)?),
        None => args.token,
    };
    if let Some(token) = token {
        builder = builder.token(token);
    }
    if let Some(timeout) = args.timeout {
        builder = builder.timeout(timeout);
    }
    builder = args
        .headers
        .into_iter()
        .fold(builder, |builder, (name, value)| builder.header(name, value));
    builder = args
        .cookies
        .into_iter()
        .fold(builder, |builder, (name, value)| builder.cookie(name, value));
    builder.build()
}

fn read_request_body(data: Option<String>, file: Option<String>) -> Result<String, Error> {
    if let Some(data) = data {
        return Ok(data);
    }
    match file.as_deref() {
        Some("-") | None => {
            if file.is_none() && io::stdin().is_terminal() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("missing request body")
                    .with_hint("Pass inline JSON, -f <file>, or pipe JSON on stdin."));
            }
            let mut body = String::new();
            io::stdin().read_to_string(&mut body).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read stdin")
                    .with_source(err)
            })?;
            Ok(body)
        }
        Some(path) => std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("failed to read request file {path}"))
                .with_source(err)
        }),
    }
}

/// First non-blank line of the file, so a trailing newline or comment footer is ignored.
fn load_token_file(path: &Path) -> Result<String, Error> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("cannot read --token-file {}", path.display()))
            .with_source(err)
    })?;
    contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("--token-file {} holds no token", path.display()))
                .with_hint("Write the bare token on the first line of the file.")
        })
}

fn parse_header_flag(input: &str) -> Result<(String, String), String> {
    split_flag(input, ':')
}

fn parse_cookie_flag(input: &str) -> Result<(String, String), String> {
    split_flag(input, '=')
}

fn split_flag(input: &str, separator: char) -> Result<(String, String), String> {
    let (name, value) = input
        .split_once(separator)
        .ok_or_else(|| format!("expected NAME{separator}VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name before '{separator}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_timeout(input: &str) -> Result<Duration, String> {
    let units: [(&str, fn(u64) -> Duration); 4] = [
        ("ms", Duration::from_millis),
        ("s", Duration::from_secs),
        ("m", |n| Duration::from_secs(n.saturating_mul(60))),
        ("h", |n| Duration::from_secs(n.saturating_mul(3_600))),
    ];
    let input = input.trim();
    let (count, unit) = units
        .iter()
        .find_map(|(suffix, unit)| input.strip_suffix(suffix).map(|count| (count, *unit)))
        .unwrap_or((input, Duration::from_secs));
    match count.parse::<u64>() {
        Ok(0) => Err("timeout must be greater than zero".to_string()),
        Ok(count) => Ok(unit(count)),
        Err(_) => Err(format!("{input:?} is not a duration like 500ms, 30s, or 2m")),
    }
}

fn outcome_exit_code(outcome: Option<&NewConnectorOutcome>) -> i32 {
    match outcome {
        Some(NewConnectorOutcome::Conflict(_)) => CONFLICT_EXIT_CODE,
        Some(NewConnectorOutcome::Created(_)) | None => 0,
    }
}

fn outcome_json(outcome: Option<&NewConnectorOutcome>) -> Value {
    serde_json::to_value(outcome).unwrap_or(Value::Null)
}

fn detailed_json(response: &Response<NewConnectorOutcome>) -> Value {
    let mut headers = Map::new();
    for name in response.headers.keys() {
        let values: Vec<String> = response
            .headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();
        headers.insert(name.as_str().to_string(), json!(values.join(", ")));
    }
    json!({
        "status": response.status.as_u16(),
        "headers": headers,
        "content": String::from_utf8_lossy(&response.content),
        "parsed": outcome_json(response.parsed.as_ref()),
    })
}

fn emit_json(value: &Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    println!(
        "{}",
        json.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    );
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    let rendered = if is_tty {
        error_text(err, color_mode.use_color(is_tty))
    } else {
        serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
            "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
        })
    };
    eprintln!("{rendered}");
}

fn error_message(err: &Error) -> String {
    match (err.kind(), err.message()) {
        (ErrorKind::UnexpectedStatus, _) => {
            format!("unexpected status code {}", err.status().unwrap_or_default())
        }
        (_, Some(message)) => message.to_string(),
        (kind, None) => format!("{kind:?} error").to_lowercase(),
    }
}

/// Optional context shared by the JSON and the terminal rendering, in display order.
fn error_details(err: &Error) -> Vec<(&'static str, Value)> {
    let mut details = Vec::new();
    if let Some(hint) = err.hint() {
        details.push(("hint", json!(hint)));
    }
    if let Some(url) = err.url() {
        details.push(("url", json!(url)));
    }
    if let Some(status) = err.status() {
        details.push(("status", json!(status)));
    }
    if let Some(content) = err.content() {
        details.push(("content", json!(String::from_utf8_lossy(content))));
    }
    let causes: Vec<String> =
        std::iter::successors(std::error::Error::source(err), |cause| cause.source())
            .map(ToString::to_string)
            .collect();
    if !causes.is_empty() {
        details.push(("causes", json!(causes)));
    }
    details
}

fn error_json(err: &Error) -> Value {
    let mut fields = Map::new();
    fields.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    fields.insert("message".to_string(), json!(error_message(err)));
    for (name, value) in error_details(err) {
        fields.insert(name.to_string(), value);
    }
    json!({ "error": fields })
}

fn error_text(err: &Error, use_color: bool) -> String {
    let label = |name: &str, sgr: &str| {
        if use_color {
            format!("\u{1b}[{sgr}m{name}:\u{1b}[0m")
        } else {
            format!("{name}:")
        }
    };
    let mut lines = vec![format!("{} {}", label("error", "1;31"), error_message(err))];
    for (name, value) in error_details(err) {
        let values = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        let name = if name == "causes" { "caused by" } else { name };
        for value in values {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            lines.push(format!("{} {text}", label(name, "33")));
        }
    }
    lines.join("\n")
}
