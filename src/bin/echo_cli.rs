//!
//! echo CLI binary
//! ---------------
//! Drives the session store against a live ECHO backend. The session is kept in
//! `<storage_dir>/session.json`, so `login` in one invocation is visible to `whoami`
//! in the next.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, EnvFilter};

use echo_client::config::ClientConfig;
use echo_client::gateway::{HttpGateway, PasswordChange, RegisterRequest};
use echo_client::guard::{self, AccessPolicy, GuardDecision};
use echo_client::identity::{OpOutcome, RoleTag, SessionStore};
use echo_client::realtime::{badge_label, NullChannel};
use echo_client::storage::FileStorage;

type Store = SessionStore<HttpGateway, FileStorage, NullChannel>;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <file>] <command> [args]\n\nCommands:\n  login <user> <password> [--role r]             sign in and keep the session\n  register <user> <password> [--email e] [--role r]\n                                                 create an account (does not sign in)\n  logout                                         forget the stored session\n  whoami                                         show the stored identity\n  forgot-password <email>                        request a reset mail\n  change-password <old> <new>                    change the password of the signed-in user\n  set-pref <key> <value>                         update one preference (value parsed as JSON when possible)\n  revalidate                                     reload the identity from the server\n  refresh                                        rotate the access token\n  check <location> [--role r] [--allow r1,r2] [--perm p1,p2]\n                                                 run the route guard for a page\n  unread                                         count unread notifications\n  help                                           show this help\n\nEnvironment:\n  ECHO_API_URL, ECHO_WS_URL, ECHO_STORAGE_DIR, ECHO_HTTP_TIMEOUT_SECS, RUST_LOG\n\nExit status is 0 on success and 1 on failure."
    );
}

/// Positional arguments plus `--flag value` pairs.
struct Args {
    positional: Vec<String>,
    flags: HashMap<String, String>,
}

impl Args {
    fn parse(raw: impl Iterator<Item = String>) -> Result<Self> {
        let mut positional = Vec::new();
        let mut flags = HashMap::new();
        let mut it = raw.peekable();
        while let Some(a) = it.next() {
            if a == "-h" || a == "--help" {
                positional.insert(0, "help".to_string());
                continue;
            }
            if let Some(name) = a.strip_prefix("--") {
                let v = it.next().ok_or_else(|| anyhow!("--{} needs a value", name))?;
                flags.insert(name.to_string(), v);
            } else {
                positional.push(a);
            }
        }
        Ok(Self { positional, flags })
    }

    fn arg(&self, idx: usize, what: &str) -> Result<&str> {
        self.positional.get(idx).map(|s| s.as_str()).ok_or_else(|| anyhow!("missing <{}>", what))
    }

    fn flag(&self, name: &str) -> Option<&str> { self.flags.get(name).map(|s| s.as_str()) }

    fn list(&self, name: &str) -> Vec<String> {
        self.flag(name)
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

fn role_flag(args: &Args) -> Result<Option<String>> {
    match args.flag("role") {
        Some(r) => Ok(Some(RoleTag::from_str(r).map_err(|e| anyhow!(e))?.as_str().to_string())),
        None => Ok(None),
    }
}

fn outcome(o: OpOutcome, done: &str) -> Result<()> {
    if o.success {
        println!("{}", done);
        Ok(())
    } else {
        Err(anyhow!(o.error.unwrap_or_else(|| "operation failed".to_string())))
    }
}

async fn run(cmd: &str, args: &Args, store: &Store) -> Result<()> {
    match cmd {
        "login" => {
            let role = role_flag(args)?;
            let o = store.login(args.arg(1, "user")?, args.arg(2, "password")?, role.as_deref()).await;
            outcome(o, "signed in")?;
            if let Some(u) = store.identity() {
                println!("{} ({})", u.display_name(), u.resolved_role().unwrap_or("no role"));
            }
            Ok(())
        }
        "register" => {
            let req = RegisterRequest {
                username: args.arg(1, "user")?.to_string(),
                password: args.arg(2, "password")?.to_string(),
                email: args.flag("email").unwrap_or_default().to_string(),
                role: role_flag(args)?,
                ..RegisterRequest::default()
            };
            outcome(store.register(&req).await, "registered; sign in with `login`")
        }
        "logout" => {
            store.logout();
            println!("signed out");
            Ok(())
        }
        "whoami" => {
            let snap = store.snapshot();
            match snap.identity.filter(|_| snap.is_authenticated) {
                Some(u) => {
                    println!("{}", serde_json::to_string_pretty(&u)?);
                    Ok(())
                }
                None => Err(anyhow!("not signed in")),
            }
        }
        "forgot-password" => outcome(store.forgot_password(args.arg(1, "email")?).await, "if the address is known, a reset mail is on its way"),
        "change-password" => {
            let change = PasswordChange {
                old_password: args.arg(1, "old")?.to_string(),
                new_password: args.arg(2, "new")?.to_string(),
            };
            outcome(store.change_password(&change).await, "password changed")
        }
        "set-pref" => {
            let key = args.arg(1, "key")?;
            let raw = args.arg(2, "value")?;
            let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            let mut prefs = store
                .identity()
                .and_then(|u| u.preferences)
                .map(serde_json::to_value)
                .transpose()?
                .unwrap_or_else(|| json!({}));
            if let Value::Object(m) = &mut prefs {
                m.insert(key.to_string(), value);
            }
            outcome(store.update_preferences(&prefs).await, "preferences updated")
        }
        "revalidate" => outcome(store.revalidate().await, "identity reloaded"),
        "refresh" => outcome(store.refresh().await, "token rotated"),
        "check" => {
            let location = args.arg(1, "location")?;
            let mut policy = AccessPolicy::authenticated()
                .with_allowed_roles(args.list("allow"))
                .with_permissions(args.list("perm"));
            if let Some(r) = args.flag("role") {
                policy = policy.with_required_role(r);
            }
            let decision = guard::evaluate(&store.snapshot(), &policy, location);
            match &decision {
                GuardDecision::Render => {
                    println!("render {}", location);
                    Ok(())
                }
                other => Err(anyhow!("redirect to {}", other.redirect_path().unwrap_or("?"))),
            }
        }
        "unread" => {
            let n = store.unread_count().await.map_err(|e| anyhow!(e.display_message("Failed to load notifications")))?;
            println!("{} unread{}", n, badge_label(n).map(|b| format!(" [{}]", b)).unwrap_or_default());
            Ok(())
        }
        other => Err(anyhow!("unknown command '{}'; try `help`", other)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let program = env::args().next().unwrap_or_else(|| "echo_cli".to_string());
    match try_main(&program).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn try_main(program: &str) -> Result<()> {
    let args = Args::parse(env::args().skip(1))?;
    let cmd = match args.positional.first().map(|s| s.as_str()) {
        None | Some("help") => {
            print_usage(program);
            return Ok(());
        }
        Some(c) => c.to_string(),
    };

    let cfg = match args.flag("config") {
        Some(p) => ClientConfig::load(&PathBuf::from(p)).with_context(|| format!("loading config {}", p))?,
        None => ClientConfig::from_env(),
    };
    let storage = FileStorage::open(&cfg.storage_dir).with_context(|| format!("opening {}", cfg.storage_dir.display()))?;
    let gateway = HttpGateway::from_config(&cfg)?;
    let store = Store::new(gateway, storage, NullChannel);
    store.initialize();
    tracing::debug!("echo_cli: {} against {}", cmd, cfg.api_base_url);

    run(&cmd, &args, &store).await
}
