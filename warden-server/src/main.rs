use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use warden::{AgentConfig, Dispatcher, OperationContext};
use warden_http::serve;
use warden_http::server::DEFAULT_BIND_ADDR;

#[derive(Parser)]
#[command(name = "warden", version, about = "Database high-availability sidecar agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, env = "WARDEN_DATA_DIR", default_value = "./data")]
    data_dir: String,
    #[arg(long, env = "WARDEN_BIND_ADDR")]
    bind_addr: Option<String>,
    #[arg(long, env = "WARDEN_PORT")]
    port: Option<u16>,

    /// Database engine served by this agent (postgresql, mysql, mongodb...)
    #[arg(long, env = "WARDEN_ENGINE")]
    engine: Option<String>,
    #[arg(long, env = "WARDEN_WORKLOAD")]
    workload: Option<String>,
    /// Member name of this instance. Defaults to the hostname.
    #[arg(long, env = "WARDEN_POD_NAME")]
    pod_name: Option<String>,
    #[arg(long, env = "WARDEN_DB_PORT")]
    db_port: Option<u16>,

    /// Seconds between background volume checks; 0 disables the loop
    #[arg(long, env = "WARDEN_VOLUME_PROTECTION_INTERVAL_SECS")]
    volume_protection_interval: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the probe operations this agent answers
    Operations,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cmd = Cli::command();
    let matches = cmd.get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    match cli.command {
        Some(Command::Operations) => {
            for op in builtin_operations() {
                println!("{}", op);
            }
            Ok(())
        }
        None => {
            let bind_addr = resolve_bind_addr(&cli, &matches)
                .map_err(|msg| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))?;
            for (key, value) in runtime_env(&cli, bind_addr) {
                std::env::set_var(key, value);
            }
            serve().await
        }
    }
}

fn builtin_operations() -> Vec<String> {
    Dispatcher::with_builtin(OperationContext::new(AgentConfig::default()), None).operations()
}

/// Resolved settings exported for `serve`, which reads the environment.
fn runtime_env(cli: &Cli, bind_addr: String) -> Vec<(&'static str, String)> {
    let mut vars = vec![
        ("WARDEN_DATA_DIR", cli.data_dir.clone()),
        ("WARDEN_BIND_ADDR", bind_addr),
    ];
    if let Some(engine) = &cli.engine {
        vars.push(("WARDEN_ENGINE", engine.clone()));
    }
    if let Some(workload) = &cli.workload {
        vars.push(("WARDEN_WORKLOAD", workload.clone()));
    }
    if let Some(pod_name) = &cli.pod_name {
        vars.push(("WARDEN_POD_NAME", pod_name.clone()));
    }
    if let Some(port) = cli.db_port {
        vars.push(("WARDEN_DB_PORT", port.to_string()));
    }
    if let Some(secs) = cli.volume_protection_interval {
        vars.push(("WARDEN_VOLUME_PROTECTION_INTERVAL_SECS", secs.to_string()));
    }
    vars
}

fn resolve_bind_addr(cli: &Cli, matches: &ArgMatches) -> Result<String, String> {
    let bind_on_cli = is_set_on_command_line(matches, "bind_addr");
    let port_on_cli = is_set_on_command_line(matches, "port");

    if bind_on_cli && port_on_cli {
        return Err("--port cannot be used with --bind-addr".to_string());
    }

    if bind_on_cli {
        if let Some(bind_addr) = &cli.bind_addr {
            return Ok(bind_addr.clone());
        }
    }

    if port_on_cli {
        if let Some(port) = cli.port {
            return Ok(format!("0.0.0.0:{port}"));
        }
    }

    if let Some(bind_addr) = &cli.bind_addr {
        return Ok(bind_addr.clone());
    }

    if let Some(port) = cli.port {
        return Ok(format!("0.0.0.0:{port}"));
    }

    Ok(DEFAULT_BIND_ADDR.to_string())
}

fn is_set_on_command_line(matches: &ArgMatches, arg: &str) -> bool {
    matches.value_source(arg) == Some(ValueSource::CommandLine)
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn parse_cli(args: &[&str]) -> (Cli, ArgMatches) {
        let matches = Cli::command()
            .try_get_matches_from(args)
            .expect("args should parse");
        let cli = Cli::from_arg_matches(&matches).expect("matches should parse into Cli");
        (cli, matches)
    }

    fn clear_env() {
        for key in [
            "WARDEN_BIND_ADDR",
            "WARDEN_PORT",
            "WARDEN_ENGINE",
            "WARDEN_WORKLOAD",
            "WARDEN_DATA_DIR",
            "WARDEN_DB_PORT",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_to_standard_probe_port() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_env();
        let (cli, matches) = parse_cli(&["warden"]);
        assert_eq!(resolve_bind_addr(&cli, &matches).unwrap(), DEFAULT_BIND_ADDR);
        assert_eq!(cli.data_dir, "./data");
    }

    #[test]
    fn command_line_port_overrides_env_bind_addr() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_env();
        std::env::set_var("WARDEN_BIND_ADDR", "127.0.0.1:19001");

        let (cli, matches) = parse_cli(&["warden", "--port", "3502"]);
        let bind_addr = resolve_bind_addr(&cli, &matches).expect("resolve bind addr");

        clear_env();
        assert_eq!(bind_addr, "0.0.0.0:3502");
    }

    #[test]
    fn env_bind_addr_is_used_when_no_flags() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_env();
        std::env::set_var("WARDEN_BIND_ADDR", "127.0.0.1:19001");

        let (cli, matches) = parse_cli(&["warden"]);
        let bind_addr = resolve_bind_addr(&cli, &matches).expect("resolve bind addr");

        clear_env();
        assert_eq!(bind_addr, "127.0.0.1:19001");
    }

    #[test]
    fn port_and_bind_addr_conflict() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_env();
        let (cli, matches) =
            parse_cli(&["warden", "--port", "3502", "--bind-addr", "127.0.0.1:3501"]);
        assert_eq!(
            resolve_bind_addr(&cli, &matches).unwrap_err(),
            "--port cannot be used with --bind-addr"
        );
    }

    #[test]
    fn runtime_env_exports_only_given_values() {
        let _guard = ENV_MUTEX.lock().expect("lock env mutex");
        clear_env();
        let (cli, _) = parse_cli(&["warden", "--engine", "mongodb", "--db-port", "27017"]);
        let vars = runtime_env(&cli, "0.0.0.0:3501".into());

        assert!(vars.contains(&("WARDEN_ENGINE", "mongodb".to_string())));
        assert!(vars.contains(&("WARDEN_DB_PORT", "27017".to_string())));
        assert!(!vars.iter().any(|(k, _)| *k == "WARDEN_WORKLOAD"));
    }

    #[test]
    fn lists_builtin_operations() {
        let ops = builtin_operations();
        assert!(ops.contains(&"checkRole".to_string()));
        assert!(ops.contains(&"volumeProtection".to_string()));
        assert_eq!(ops.len(), 9);
    }
}
