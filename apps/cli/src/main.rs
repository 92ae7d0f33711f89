use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use smart_fertilizer_core_sdk::{
    analysis,
    catalog::{self, AnalysisRequest},
    credential::{remote_factory, CredentialStore},
    db,
    models::{Message, Origin},
    server::{self, AppState},
    session::ConversationSession,
    telemetry,
};

/**
 * \brief CLI 程序入口：凭据管理、植物分析、农业助手对话与本地服务。
 */
#[derive(Parser, Debug)]
#[command(
    name = "smart-fertilizer",
    version,
    about = "Smart Fertilizer: plant/soil analysis and an agricultural assistant"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 录入 API Key 并保存 Provider 配置。
     * \param api_key  API Key
     * \param provider Provider 类型（gemini/openai/claude）
     * \param api_base API 基地址
     * \param model    模型名
     */
    Init {
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        api_base: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /// Remove the saved API key.
    Forget,

    /// List plant types, soil types and quick questions.
    Catalog,

    /**
     * \brief 分析植物与土壤组合，远端不可用时输出兜底建议。
     */
    Analyze {
        #[arg(long)]
        plant: String,
        #[arg(long)]
        soil: String,
    },

    /**
     * \brief 与农业助手对话；给定 --message 时只发送一条。
     */
    Chat {
        #[arg(long)]
        message: Option<String>,
        #[arg(long, default_value_t = 1000)]
        pacing_ms: u64,
    },

    /// Check connectivity with the configured provider.
    Health,

    /**
     * \brief 启动本地 HTTP 服务并提供前端页面。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let db_path = db::default_db_path();
    let conn = db::open_db(&db_path).context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Init {
            api_key,
            provider,
            api_base,
            model,
            enable_telemetry,
        } => {
            let mut store = CredentialStore::open(&db_path, remote_factory())
                .context("load credential failed")?;
            let settings = store.settings().overridden(
                provider.as_deref(),
                api_base.as_deref(),
                model.as_deref(),
            );
            let configured = store.configure(settings, &api_key)?;
            db::set_telemetry_enabled(&conn, enable_telemetry).context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            let settings = store.settings();
            if configured {
                println!(
                    "Saved credential ({} | {} | {})",
                    settings.kind.as_str(),
                    settings.api_base,
                    settings.model
                );
            } else {
                println!(
                    "Credential could not be applied for {}; analyses will use general guidelines",
                    settings.kind.as_str()
                );
            }
        }
        Commands::Forget => {
            let mut store = CredentialStore::open(&db_path, remote_factory())
                .context("load credential failed")?;
            store.clear().context("clear credential failed")?;
            println!("Credential removed");
        }
        Commands::Catalog => {
            println!("Plants:");
            for p in catalog::plant_entries() {
                println!("  {} {:<12} {}", p.icon, p.value, p.name);
            }
            println!("Soils:");
            for s in catalog::soil_entries() {
                println!(
                    "  {:<8} pH {:.1}-{:.1}  {}",
                    s.value, s.ph_min, s.ph_max, s.description
                );
            }
            println!("Quick questions:");
            for q in catalog::quick_questions() {
                println!("  - {}", q);
            }
        }
        Commands::Analyze { plant, soil } => {
            let request = AnalysisRequest::new(&plant, &soil)?;
            let store = CredentialStore::open(&db_path, remote_factory())
                .context("load credential failed")?;
            let result = analysis::analyze_plant(&store.client(), &request).await;
            println!(
                "{} on {} soil: {}% compatible ({:?})",
                request.plant_type,
                request.soil_type,
                result.compatibility_percent,
                result.source
            );
            println!();
            println!("{}", result.recommendation_text);
            println!();
            println!("Suggested fertilizers:");
            for f in &result.fertilizer_suggestions {
                println!("  - {} ({}): {}", f.name, f.price, f.description);
            }
        }
        Commands::Chat { message, pacing_ms } => {
            let store = CredentialStore::open(&db_path, remote_factory())
                .context("load credential failed")?;
            let client = store.client();
            if !client.is_ready() {
                eprintln!("No API key configured, run: smart-fertilizer init --api-key ...");
            }
            let mut session =
                ConversationSession::new().with_pacing(Duration::from_millis(pacing_ms));
            print_message(&session.messages()[0]);

            match message {
                Some(text) => {
                    let reply = session.send_message(&client, &text).await?;
                    print_message(reply);
                }
                None => {
                    let mut lines = BufReader::new(tokio::io::stdin()).lines();
                    prompt_marker();
                    while let Some(line) = lines.next_line().await.context("read stdin failed")? {
                        let trimmed = line.trim();
                        if trimmed.eq_ignore_ascii_case("exit")
                            || trimmed.eq_ignore_ascii_case("quit")
                        {
                            break;
                        }
                        if trimmed.is_empty() {
                            prompt_marker();
                            continue;
                        }
                        let reply = session.send_message(&client, &line).await?;
                        print_message(reply);
                        prompt_marker();
                    }
                }
            }
            telemetry::log_event(
                "cli.chat",
                &format!("session ended messages={}", session.len()),
            );
        }
        Commands::Health => {
            let store = CredentialStore::open(&db_path, remote_factory())
                .context("load credential failed")?;
            let settings = store.settings();
            match store.client().list_models().await {
                Ok(list) => println!(
                    "OK: {} reachable at {} ({} models)",
                    settings.kind.as_str(),
                    settings.api_base,
                    list.len()
                ),
                Err(e) => println!("FAILED: {} ({})", settings.kind.as_str(), e),
            }
        }
        Commands::Serve { addr } => {
            let state = AppState::open(&db_path).context("load server state failed")?;
            server::run(&addr, state).await?;
        }
    }

    Ok(())
}

fn print_message(message: &Message) {
    let who = match message.origin {
        Origin::User => "You",
        Origin::Assistant => "Assistant",
    };
    println!("{}: {}", who, message.text);
}

fn prompt_marker() {
    print!("> ");
    std::io::stdout().flush().ok();
}
