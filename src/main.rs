use anyhow::{Context, Result, anyhow, bail};
use caller::config::SystemEnv;
use caller::{Attachment, CallOptions, Caller, Reply, ServiceConfigStore};
use clap::{Parser, ValueEnum};
use log::debug;
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;

/// caller - HTTP requests against configured services
///
/// Services are read from a TOML file (--config, CALLER_CONFIG, or
/// <config dir>/caller/services.toml) and CALLER_<SERVICE>_<FIELD>
/// environment variables.
///
/// Examples:
///   caller get users page=1                 # GET <default url>/users?page=1
///   caller -s billing post invoices id=7    # POST JSON to the billing service
#[derive(Parser, Debug)]
#[command(author, version = env!("CALLER_VERSION"), about)]
struct Cli {
    /// Services configuration file
    #[arg(long, short = 'c', env = "CALLER_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Service to call (unknown services fall back to "default")
    #[arg(long, short = 's', default_value = "default")]
    service: String,

    /// HTTP method
    #[arg(value_enum)]
    method: Verb,

    /// Path joined to the service URL
    path: String,

    /// Request params, sent as query string or body depending on the method
    #[arg(value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Send the body as application/x-www-form-urlencoded
    #[arg(long)]
    form: bool,

    /// Do not authenticate
    #[arg(long)]
    public: bool,

    /// Extra header, overrides the service's header of the same name
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,

    /// Extra cookie, overrides the service's cookie of the same name
    #[arg(short = 'b', long = "cookie", value_name = "NAME=VALUE")]
    cookies: Vec<String>,

    /// Attach a file as a multipart field
    #[arg(long, value_name = "FIELD=PATH")]
    attach: Option<String>,

    /// File name for the attachment (defaults to the file's name)
    #[arg(long, requires = "attach")]
    filename: Option<String>,

    /// Print the assembled request instead of sending it
    #[arg(long)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Verb {
    Head,
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<Verb> for Method {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Head => Method::HEAD,
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Patch => Method::PATCH,
            Verb::Delete => Method::DELETE,
        }
    }
}

fn split_pair<'a>(raw: &'a str, separator: char, what: &str) -> Result<(&'a str, &'a str)> {
    let (key, value) = raw
        .split_once(separator)
        .ok_or_else(|| anyhow!("Invalid {} '{}', expected KEY{}VALUE", what, raw, separator))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid {} '{}': name cannot be empty", what, raw);
    }
    Ok((key, value.trim()))
}

fn load_store(config: Option<PathBuf>) -> Result<ServiceConfigStore> {
    let store = match config {
        Some(path) => ServiceConfigStore::from_path(&path)?,
        None => match ServiceConfigStore::default_path(&SystemEnv) {
            Some(path) if path.exists() => ServiceConfigStore::from_path(&path)?,
            _ => {
                debug!("No services file found, using environment only");
                ServiceConfigStore::new()
            }
        },
    };
    Ok(store.with_env(&SystemEnv))
}

fn attachment_from(raw: &str, filename: Option<String>) -> Result<Attachment> {
    let (field, path) = split_pair(raw, '=', "attachment")?;
    let path = PathBuf::from(path);
    let filename = match filename {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Attachment path has no file name")?,
    };
    Ok(Attachment::new(field, path, filename))
}

impl Cli {
    fn params(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.params
            .iter()
            .map(|raw| {
                let (key, value) = split_pair(raw, '=', "param")?;
                Ok((key.to_string(), serde_json::Value::String(value.to_string())))
            })
            .collect()
    }

    fn options(&self) -> Result<CallOptions> {
        let mut options = CallOptions::new()
            .as_form(self.form)
            .public(self.public)
            .debug(self.debug);
        for raw in &self.headers {
            let (name, value) = split_pair(raw, ':', "header")?;
            options = options.header(name, value);
        }
        for raw in &self.cookies {
            let (name, value) = split_pair(raw, '=', "cookie")?;
            options = options.cookie(name, value);
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let params = cli.params()?;
    let options = cli.options()?;
    let store = Arc::new(load_store(cli.config.clone())?);

    let mut caller = Caller::new(store, &cli.service)?;
    if let Some(raw) = &cli.attach {
        caller.set_attachment(attachment_from(raw, cli.filename.clone())?);
    }

    let reply = caller
        .call(cli.method.into(), &cli.path, &params, options)
        .await?;

    match reply {
        Reply::DryRun(dump) => println!("{}", dump),
        Reply::Sent(response) => {
            let status = response.status();
            eprintln!("HTTP {}", status);
            let body = response.text().await.context("Failed to read response body")?;
            if !body.is_empty() {
                println!("{}", body);
            }
            if !status.is_success() {
                bail!("Request failed with status {}", status);
            }
        }
    }
    Ok(())
}
