use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use lib::api::{Attachment, Author, BackendClient, ChatBackend, Message, NewCustomer};
use lib::config::Config;
use lib::store::{JsonFileStore, KeyValueStore};
use lib::sync::{ChatSyncEngine, LoadOutcome, TypingFrame};
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// Upper bound on waiting for a typing reveal before printing the reply in full.
const REVEAL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "supportdesk")]
#[command(about = "Support desk CLI: chat with the support assistant on behalf of a customer", long_about = None)]
struct Cli {
    /// Config file path (default: SUPPORTDESK_CONFIG_PATH or ~/.supportdesk/config.json)
    #[arg(long, short, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init,

    /// List or create customers.
    Customers {
        #[command(subcommand)]
        action: CustomerAction,
    },

    /// List, create or delete a customer's conversations.
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Print the messages of a conversation.
    Messages {
        /// Conversation id
        conversation: i64,
    },

    /// Upload a document for a customer.
    Upload {
        /// File to upload
        path: PathBuf,

        /// Customer id (default: api.customerId from config)
        #[arg(long)]
        customer: Option<i64>,

        /// Document title (default: the file name)
        #[arg(long)]
        title: Option<String>,
    },

    /// Chat with the support assistant (interactive). Type /help for commands.
    Chat {
        /// Customer id (default: api.customerId from config)
        #[arg(long)]
        customer: Option<i64>,

        /// Conversation to open (default: the most recent one)
        #[arg(long, value_name = "ID")]
        conversation: Option<i64>,
    },
}

#[derive(Subcommand)]
enum CustomerAction {
    /// List all customers
    List,
    /// Create a customer
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConversationAction {
    /// List a customer's conversations, newest first
    List {
        #[arg(long)]
        customer: Option<i64>,
    },
    /// Create a conversation (blank title: "Conversation N")
    Create {
        #[arg(long)]
        customer: Option<i64>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Delete a conversation
    Delete {
        /// Conversation id
        id: i64,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("supportdesk {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(config_path).context("init failed"),
        Some(Commands::Customers { action }) => run_customers(config_path, action)
            .await
            .context("customers command failed"),
        Some(Commands::Conversations { action }) => run_conversations(config_path, action)
            .await
            .context("conversations command failed"),
        Some(Commands::Messages { conversation }) => run_messages(config_path, conversation)
            .await
            .context("messages command failed"),
        Some(Commands::Upload {
            path,
            customer,
            title,
        }) => run_upload(config_path, path, customer, title)
            .await
            .context("upload failed"),
        Some(Commands::Chat {
            customer,
            conversation,
        }) => run_chat(config_path, customer, conversation)
            .await
            .context("chat failed"),
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Loaded config plus the backend client built from it.
struct Context {
    config: Config,
    config_path: PathBuf,
    client: BackendClient,
}

impl Context {
    fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (config, config_path) = lib::config::load_config(config_path)?;
        let base = lib::config::resolve_api_base(&config);
        log::debug!("backend at {}", base);
        Ok(Self {
            client: BackendClient::new(Some(base)),
            config,
            config_path,
        })
    }

    fn customer(&self, explicit: Option<i64>) -> anyhow::Result<i64> {
        match explicit.or(self.config.api.customer_id) {
            Some(id) => Ok(id),
            None => bail!("no customer given: pass --customer or set api.customerId in the config"),
        }
    }

    fn engine(&self) -> ChatSyncEngine {
        let engine = ChatSyncEngine::new(Arc::new(self.client.clone()), &self.config);
        if !self.config.history.enabled {
            return engine;
        }
        let path = lib::config::resolve_history_path(&self.config, &self.config_path);
        log::debug!("chat history at {}", path.display());
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(path));
        engine.with_history(store)
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_customers(config_path: Option<PathBuf>, action: CustomerAction) -> anyhow::Result<()> {
    let ctx = Context::load(config_path)?;
    match action {
        CustomerAction::List => {
            let customers = ctx.client.list_customers().await?;
            if customers.is_empty() {
                println!("no customers");
            }
            for c in customers {
                let title = c.title.as_deref().unwrap_or("-");
                println!("{:>5}  {}  <{}>  {}", c.id, c.full_name, c.email, title);
            }
        }
        CustomerAction::Create {
            name,
            email,
            title,
            location,
        } => {
            let created = ctx
                .client
                .create_customer(&NewCustomer {
                    full_name: name,
                    email,
                    title,
                    location,
                })
                .await?;
            println!("created customer {} ({})", created.id, created.full_name);
        }
    }
    Ok(())
}

async fn run_conversations(
    config_path: Option<PathBuf>,
    action: ConversationAction,
) -> anyhow::Result<()> {
    let ctx = Context::load(config_path)?;
    match action {
        ConversationAction::List { customer } => {
            let customer = ctx.customer(customer)?;
            let conversations = ctx.client.list_conversations(customer).await?;
            if conversations.is_empty() {
                println!("no conversations for customer {}", customer);
            }
            for c in conversations {
                println!("{:>5}  {}", c.id, c.title);
            }
        }
        ConversationAction::Create { customer, title } => {
            let engine = ctx.engine();
            engine.set_customer(ctx.customer(customer)?).await?;
            let created = engine.create_conversation(title.as_deref()).await?;
            println!("created conversation {} ({})", created.id, created.title);
        }
        ConversationAction::Delete { id } => {
            ctx.engine().delete_conversation(id).await?;
            println!("deleted conversation {}", id);
        }
    }
    Ok(())
}

async fn run_messages(config_path: Option<PathBuf>, conversation: i64) -> anyhow::Result<()> {
    let ctx = Context::load(config_path)?;
    let messages = ctx.client.list_messages(conversation).await?;
    if messages.is_empty() {
        println!("no messages");
    }
    for m in &messages {
        print_message(m);
    }
    Ok(())
}

async fn run_upload(
    config_path: Option<PathBuf>,
    path: PathBuf,
    customer: Option<i64>,
    title: Option<String>,
) -> anyhow::Result<()> {
    let ctx = Context::load(config_path)?;
    let customer = ctx.customer(customer)?;
    let file = Attachment::from_path(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let title = title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| file.file_name.clone());
    let doc = ctx.client.upload_document(customer, &title, file).await?;
    println!("uploaded document {} ({}) -> {}", doc.id, doc.title, doc.url);
    Ok(())
}

async fn run_chat(
    config_path: Option<PathBuf>,
    customer: Option<i64>,
    conversation: Option<i64>,
) -> anyhow::Result<()> {
    let ctx = Context::load(config_path)?;
    let customer = ctx.customer(customer)?;
    let engine = ctx.engine();
    engine.set_customer(customer).await?;
    if let Some(id) = conversation {
        if !engine.conversations().await.iter().any(|c| c.id == id) {
            bail!("customer {} has no conversation {}", customer, id);
        }
        engine.select_conversation(Some(id)).await;
    }
    match engine.selected().await {
        Some(_) => print_selected(&engine).await,
        None => println!("no conversations yet; type /new to start one"),
    }

    let mut frames = engine.typing();
    let mut staged: Vec<Attachment> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command
                .split_once(char::is_whitespace)
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match name.to_ascii_lowercase().as_str() {
                "exit" | "quit" => break,
                "help" => print_help(),
                "list" => print_conversations(&engine).await,
                "new" => {
                    let title = Some(arg).filter(|t| !t.is_empty());
                    match engine.create_conversation(title).await {
                        Ok(created) => {
                            println!("started conversation {} ({})", created.id, created.title)
                        }
                        Err(e) => eprintln!("could not create conversation: {}", e),
                    }
                }
                "delete" => match engine.selected().await {
                    Some(id) => match engine.delete_conversation(id).await {
                        Ok(()) => {
                            println!("deleted conversation {}", id);
                            match engine.selected().await {
                                Some(_) => print_selected(&engine).await,
                                None => println!("no conversations left; type /new to start one"),
                            }
                        }
                        Err(e) => eprintln!("could not delete conversation {}: {}", id, e),
                    },
                    None => eprintln!("no conversation selected"),
                },
                "switch" => match arg.parse::<i64>() {
                    Ok(id) if engine.conversations().await.iter().any(|c| c.id == id) => {
                        if engine.select_conversation(Some(id)).await == Some(LoadOutcome::Failed) {
                            eprintln!("could not load messages of conversation {}", id);
                        }
                        print_selected(&engine).await;
                    }
                    Ok(id) => eprintln!("no conversation {}; /list shows them", id),
                    Err(_) => eprintln!("usage: /switch <conversation id>"),
                },
                "attach" => {
                    if arg.is_empty() {
                        eprintln!("usage: /attach <path>");
                        continue;
                    }
                    match Attachment::from_path(std::path::Path::new(arg)).await {
                        Ok(file) => {
                            println!(
                                "attached {} ({} bytes); it goes with your next message",
                                file.file_name,
                                file.bytes.len()
                            );
                            staged.push(file);
                        }
                        Err(e) => eprintln!("could not read {}: {}", arg, e),
                    }
                }
                "reload" => {
                    if let Err(e) = engine.refresh_conversations().await {
                        eprintln!("could not refresh conversations: {}", e);
                    }
                    if let Some(id) = engine.selected().await {
                        if engine.load_messages(id).await == LoadOutcome::Failed {
                            eprintln!("could not load messages of conversation {}", id);
                        }
                    }
                    print_selected(&engine).await;
                }
                other => eprintln!("unknown command /{}; /help lists commands", other),
            }
            continue;
        }

        let Some(conversation_id) = engine.selected().await else {
            eprintln!("no conversation selected; type /new to start one");
            continue;
        };
        let known: HashSet<i64> = engine.messages().await.iter().map(|m| m.id).collect();
        match engine
            .send_message(conversation_id, input, staged.clone())
            .await
        {
            Ok(outcome) => {
                staged.clear();
                let arrived = engine
                    .messages()
                    .await
                    .into_iter()
                    .filter(|m| !m.is_pending() && !known.contains(&m.id))
                    .filter(|m| m.author == Author::Agent)
                    .last();
                match arrived {
                    Some(reply) => reveal(&mut frames, &reply).await?,
                    None => {
                        if let Some(text) = outcome.reply {
                            println!("< {}", text.trim());
                        }
                    }
                }
            }
            Err(e) => eprintln!("send failed: {}", e),
        }
    }

    Ok(())
}

/// Print `reply` as its typing frames arrive; falls back to the full text if they stall.
async fn reveal(
    frames: &mut watch::Receiver<Option<TypingFrame>>,
    reply: &Message,
) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "< ")?;
    let mut shown = 0;
    let streamed = tokio::time::timeout(
        REVEAL_TIMEOUT,
        stream_frames(frames, reply.id, &mut stdout, &mut shown),
    )
    .await;
    match streamed {
        Ok(written) => written?,
        Err(_) => {
            log::debug!("typing reveal of message {} timed out", reply.id);
            if let Some(rest) = reply.text.get(shown..) {
                write!(stdout, "{}", rest)?;
            }
        }
    }
    writeln!(stdout)?;
    Ok(())
}

/// Write the newly visible part of each frame for `message_id` until the done frame.
async fn stream_frames(
    frames: &mut watch::Receiver<Option<TypingFrame>>,
    message_id: i64,
    stdout: &mut std::io::Stdout,
    shown: &mut usize,
) -> std::io::Result<()> {
    loop {
        let frame = frames.borrow_and_update().clone();
        if let Some(frame) = frame.filter(|f| f.message_id == message_id) {
            if let Some(fresh) = frame.visible.get(*shown..) {
                write!(stdout, "{}", fresh)?;
                stdout.flush()?;
                *shown = frame.visible.len();
            }
            if frame.done {
                return Ok(());
            }
        }
        if frames.changed().await.is_err() {
            return Ok(());
        }
    }
}

async fn print_conversations(engine: &ChatSyncEngine) {
    let selected = engine.selected().await;
    let conversations = engine.conversations().await;
    if conversations.is_empty() {
        println!("no conversations");
    }
    for c in conversations {
        let marker = if Some(c.id) == selected { '*' } else { ' ' };
        println!("{} {:>5}  {}", marker, c.id, c.title);
    }
}

async fn print_selected(engine: &ChatSyncEngine) {
    let Some(id) = engine.selected().await else {
        return;
    };
    let title = engine
        .conversations()
        .await
        .into_iter()
        .find(|c| c.id == id)
        .map(|c| c.title)
        .unwrap_or_default();
    println!("-- conversation {} {} --", id, title);
    for m in engine.messages().await {
        print_message(&m);
    }
}

fn print_message(m: &Message) {
    let when = m
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let prefix = match m.author {
        Author::Admin => ">",
        Author::Agent => "<",
    };
    println!("{} {} {}", prefix, m.text.trim(), when);
}

fn print_help() {
    println!("commands:");
    println!("  /new [title]    start a conversation");
    println!("  /delete         delete the current conversation");
    println!("  /switch <id>    open another conversation");
    println!("  /list           list conversations (* = current)");
    println!("  /attach <path>  attach a file to the next message");
    println!("  /reload         refresh conversations and messages");
    println!("  /help           show this help");
    println!("  /exit           leave the chat");
    println!("anything else is sent as a message");
}
