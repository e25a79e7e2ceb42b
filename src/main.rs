mod analyzer;
mod budget;
mod config;
mod crawler;
mod digest;
mod llm;
mod mailer;
mod models;
mod newsletter;
mod prompts;
mod scoring;
mod storage;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use budget::TokenBudgetTracker;
use config::{AppConfig, Lexicon, ScoringMode, DEFAULT_CONFIG_PATH, DEFAULT_LEXICON_PATH};
use crawler::ArxivClient;
use digest::ResearchDigest;
use llm::{GroqClient, LlmGateway};
use mailer::SmtpMailer;
use models::{ScoredPaper, Specialty, Subscriber};
use scoring::{InterestScorer, MethodologyClassifier, MethodologyScorer, PaperScorer};
use storage::Database;
use utils::logger;

#[derive(Parser)]
#[command(name = "meddigest")]
#[command(about = "医学论文周报自动生成系统", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化配置、短语表和数据库
    Init,
    /// 获取论文并生成简报
    Digest {
        /// arXiv 检索式，默认取配置
        #[arg(short, long)]
        query: Option<String>,
        /// 最多获取的论文数
        #[arg(short, long)]
        max_results: Option<usize>,
        /// 不发送邮件
        #[arg(long)]
        no_email: bool,
    },
    /// 对已分析的论文 JSON 重新按关键词规则评分
    Score {
        /// ScoredPaper 数组的 JSON 文件
        input: PathBuf,
        /// 只列出不低于该分数的论文
        #[arg(long)]
        min: Option<f64>,
        /// 只列出不高于该分数的论文
        #[arg(long, default_value_t = 10.0)]
        max: f64,
    },
    /// 查看已保存的论文分析
    Papers {
        /// 最低兴趣分
        #[arg(long, default_value_t = 0.0)]
        min_score: f64,
        /// 指定论文 ID 查看详情
        #[arg(long)]
        id: Option<String>,
        /// 只看某一专科分数最高的论文
        #[arg(long)]
        specialty: Option<String>,
        /// 按专科查询时的最大条数
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// 登记邮件订阅
    Subscribe {
        /// 订阅邮箱
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// 关注的专科，逗号分隔
        #[arg(long, value_delimiter = ',')]
        interests: Vec<String>,
        /// 期望的阅读时长
        #[arg(long, default_value = "5-10 minutes")]
        reading_time: String,
    },
    /// 列出全部订阅者
    Subscribers,
    /// 用最近一次简报重新生成 Markdown
    Newsletter {
        /// 输出目录，默认取配置
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 启动定时任务
    Schedule {
        /// cron 表达式（秒 分 时 日 月 周）
        #[arg(long, default_value = utils::scheduler::WEEKLY_DIGEST_CRON)]
        cron: String,
    },
    /// 清空数据库
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger();
    info!("meddigest 启动");

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_command().await?;
        }
        Commands::Digest {
            query,
            max_results,
            no_email,
        } => {
            let config = AppConfig::load()?;
            run_digest(&config, query, max_results, !no_email).await?;
        }
        Commands::Score { input, min, max } => {
            score_command(&input, min, max).await?;
        }
        Commands::Papers {
            min_score,
            id,
            specialty,
            limit,
        } => {
            papers_command(min_score, id, specialty, limit).await?;
        }
        Commands::Subscribe {
            email,
            first_name,
            last_name,
            interests,
            reading_time,
        } => {
            subscribe_command(email, first_name, last_name, interests, reading_time).await?;
        }
        Commands::Subscribers => {
            subscribers_command().await?;
        }
        Commands::Newsletter { output } => {
            newsletter_command(output).await?;
        }
        Commands::Schedule { cron } => {
            schedule_command(cron).await?;
        }
        Commands::Clean => {
            clean_command().await?;
        }
    }

    Ok(())
}

async fn init_command() -> Result<()> {
    info!("初始化系统...");

    let mut app_config = AppConfig::default();
    app_config.scoring.lexicon_path = DEFAULT_LEXICON_PATH.to_string();

    tokio::fs::create_dir_all("config").await?;
    tokio::fs::create_dir_all(&app_config.digest.output_dir).await?;
    if let Some(parent) = Path::new(&app_config.storage.database_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    app_config.save(DEFAULT_CONFIG_PATH)?;
    info!("已生成配置文件: {}", DEFAULT_CONFIG_PATH);

    Lexicon::default().save(DEFAULT_LEXICON_PATH)?;
    info!("已生成评分短语表: {}", DEFAULT_LEXICON_PATH);

    let db = open_database(&app_config).await?;
    info!("数据库初始化完成");

    info!("✅ 系统初始化完成！");
    info!("下一步:");
    info!("  1. 设置 GROQ_API_KEY 或编辑 {} 中的 [llm] api_key", DEFAULT_CONFIG_PATH);
    info!("  2. 按需调整 {} 中的评分短语", DEFAULT_LEXICON_PATH);
    info!("  3. 运行 'meddigest digest' 生成简报");

    Ok(())
}

fn build_scorer(config: &AppConfig, llm: &LlmGateway) -> Result<PaperScorer> {
    let lexicon = Arc::new(Lexicon::load(config.lexicon_path().as_deref())?);
    let scorer = match config.scoring.mode {
        ScoringMode::Heuristic => PaperScorer::Heuristic(InterestScorer::new(lexicon)),
        ScoringMode::Methodology => PaperScorer::Methodology(MethodologyScorer::new(
            MethodologyClassifier::new(llm.clone()),
            lexicon,
        )),
    };
    Ok(scorer)
}

/// 完整流程：获取 → 分析 → 评分 → 综合 → 入库 → 输出 Markdown → 发送邮件
async fn run_digest(
    config: &AppConfig,
    query: Option<String>,
    max_results: Option<usize>,
    send_email: bool,
) -> Result<()> {
    config.require_credentials()?;

    let query = query.unwrap_or_else(|| config.crawler.search_query.clone());
    let max_results = max_results.unwrap_or(config.crawler.max_results);

    let budget = Arc::new(TokenBudgetTracker::new(config.budget.clone()));
    let llm = LlmGateway::new(Arc::new(GroqClient::new(config.llm.clone())?), Arc::clone(&budget));
    let scorer = build_scorer(config, &llm)?;
    let source = Arc::new(ArxivClient::new(config.crawler.clone())?);

    let digest = ResearchDigest::new(
        source,
        llm,
        scorer,
        config.digest.clone(),
        config.scoring.high_interest_threshold,
    );

    let run = digest.generate(&query, max_results).await?;
    budget.print_usage_summary().await;

    let mut subscribers = Vec::new();
    match Database::new(&config.database_url()).await {
        Ok(db) => {
            db.init_schema().await?;
            if let Err(e) = db.store_digest(&run.document).await {
                warn!("保存简报失败: {}", e);
            }
            for item in &run.papers {
                if let Err(e) = db.store_paper_analysis(item).await {
                    warn!("保存论文分析失败 {}: {}", item.paper.id, e);
                }
            }
            match db.list_subscribers().await {
                Ok(list) => subscribers = list,
                Err(e) => warn!("读取订阅者失败: {}", e),
            }
        }
        Err(e) => {
            warn!("数据库不可用，跳过入库: {}", e);
        }
    }

    let (_, path) = newsletter::save_markdown(&run.document, Path::new(&config.digest.output_dir)).await?;
    info!("✅ 简报已生成: {}", path.display());

    if send_email && config.email.enabled {
        if config.email.recipients.is_empty() && subscribers.is_empty() {
            info!("未配置收件人且没有订阅者，跳过邮件发送");
        } else {
            let body = newsletter::render_text(&run.document);
            let mailer = SmtpMailer::new(config.email.clone());
            if !config.email.recipients.is_empty() {
                mailer::send_newsletter(&mailer, &config.email.recipients, &config.email.subject, &body).await;
            }
            if !subscribers.is_empty() {
                mailer::send_personalized(
                    &mailer,
                    &subscribers,
                    Some(&run.document),
                    &config.email.subject,
                    &body,
                )
                .await;
            }
        }
    }

    Ok(())
}

async fn score_command(input: &Path, min: Option<f64>, max: f64) -> Result<()> {
    let app_config = AppConfig::load()?;
    let lexicon = Arc::new(Lexicon::load(app_config.lexicon_path().as_deref())?);
    let scorer = InterestScorer::new(lexicon);

    let content = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("读取文件失败: {}", input.display()))?;
    let mut papers: Vec<ScoredPaper> = serde_json::from_str(&content)
        .with_context(|| format!("解析论文 JSON 失败: {}", input.display()))?;

    scoring::score_all(&scorer, &mut papers);
    info!("已为 {} 篇论文评分", papers.len());

    let selected = match min {
        Some(min) => scoring::get_by_range(&papers, min, max),
        None => scoring::get_high_interest(&papers, app_config.scoring.high_interest_threshold),
    };

    if selected.is_empty() {
        info!("没有符合分数条件的论文");
    }
    for item in selected {
        info!(
            "{:.1} [{}] {} ({})",
            item.analysis.interest_score, item.paper.id, item.paper.title, item.analysis.specialty
        );
        if let Some(breakdown) = &item.analysis.score_breakdown {
            for (name, reason) in &breakdown.details {
                if let Some(points) = breakdown.get(name) {
                    info!("    {}: {:+.2} {}", name, points, reason);
                }
            }
        }
    }

    Ok(())
}

async fn papers_command(min_score: f64, id: Option<String>, specialty: Option<String>, limit: u32) -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    if let Some(id) = id {
        match db.get_paper_analysis(&id).await? {
            Some(item) => println!("{}", serde_json::to_string_pretty(&item)?),
            None => info!("未找到论文: {}", id),
        }
        return Ok(());
    }

    if let Some(name) = specialty {
        let specialty: Specialty = name.parse().map_err(anyhow::Error::msg)?;
        let papers = db.analyses_by_specialty(specialty, limit).await?;
        info!("{} 共 {} 篇论文", specialty, papers.len());
        for item in papers {
            info!(
                "{:.1} [{}] {} | {}",
                item.analysis.interest_score, item.paper.id, item.paper.title, item.analysis.focus
            );
        }
        return Ok(());
    }

    let records = db.list_paper_analyses(min_score).await?;
    info!("共 {} 篇论文分数 ≥ {:.1}", records.len(), min_score);
    for record in records {
        info!(
            "{:.1} [{}] {} (更新于 {})",
            record.interest_score, record.paper_id, record.specialty, record.updated_at
        );
    }
    Ok(())
}

/// 打开数据库并确保表结构存在，全新数据库上的查询也能正常返回
async fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::new(&config.database_url()).await?;
    db.init_schema().await?;
    Ok(db)
}

async fn newsletter_command(output: Option<PathBuf>) -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    let Some(document) = db.latest_digest().await? else {
        info!("数据库中没有简报，请先运行 digest");
        return Ok(());
    };

    let output_dir = output.unwrap_or_else(|| PathBuf::from(&app_config.digest.output_dir));
    let (_, path) = newsletter::save_markdown(&document, &output_dir).await?;
    info!("✅ 简报已生成: {}", path.display());
    Ok(())
}

/// 校验邮箱和专科名称，构造订阅记录
fn build_subscriber(
    email: &str,
    first_name: String,
    last_name: String,
    interests: &[String],
    reading_time: String,
) -> Result<Subscriber> {
    let email = Subscriber::normalize_email(email);
    if let Err(e) = email.parse::<lettre::Address>() {
        bail!("邮箱地址无效 {}: {}", email, e);
    }

    let mut medical_interests: Vec<Specialty> = Vec::new();
    for name in interests.iter().filter(|n| !n.trim().is_empty()) {
        let specialty: Specialty = name.parse().map_err(anyhow::Error::msg)?;
        if !medical_interests.contains(&specialty) {
            medical_interests.push(specialty);
        }
    }

    Ok(Subscriber {
        email,
        first_name,
        last_name,
        medical_interests,
        reading_time,
        signed_up_at: Utc::now(),
    })
}

async fn subscribe_command(
    email: String,
    first_name: String,
    last_name: String,
    interests: Vec<String>,
    reading_time: String,
) -> Result<()> {
    let subscriber = build_subscriber(&email, first_name, last_name, &interests, reading_time)?;

    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;
    db.store_subscriber(&subscriber).await?;

    info!("✅ 已订阅: {} ({})", subscriber.email, subscriber.full_name());
    Ok(())
}

async fn subscribers_command() -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    let subscribers = db.list_subscribers().await?;
    info!("共 {} 位订阅者", subscribers.len());
    for s in subscribers {
        let interests: Vec<&str> = s.medical_interests.iter().map(|i| i.as_str()).collect();
        info!(
            "{} | {} | {} | {} | 订阅于 {}",
            s.email,
            s.full_name(),
            interests.join(", "),
            s.reading_time,
            s.signed_up_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

async fn schedule_command(cron: String) -> Result<()> {
    info!("启动定时任务调度器...");

    let app_config = Arc::new(AppConfig::load()?);
    app_config.require_credentials()?;

    let scheduler = utils::scheduler::TaskScheduler::new().await?;
    scheduler
        .add_async_job(&cron, move || {
            let config = Arc::clone(&app_config);
            async move {
                info!("执行定时简报任务");
                if let Err(e) = run_digest(&config, None, None, true).await {
                    error!("定时简报任务失败: {:#}", e);
                }
            }
        })
        .await?;

    scheduler.start().await?;

    info!("调度器运行中，按 Ctrl+C 停止");

    tokio::signal::ctrl_c().await?;
    info!("收到停止信号");

    scheduler.shutdown().await?;
    Ok(())
}

async fn clean_command() -> Result<()> {
    info!("开始清理数据...");

    match AppConfig::load() {
        Ok(config) => match Database::new(&config.database_url()).await {
            Ok(db) => {
                db.init_schema().await?;
                db.clear_all_tables().await?;
            }
            Err(e) => {
                info!("数据库连接失败，跳过清空: {}", e);
            }
        },
        Err(e) => {
            info!("配置加载失败，跳过数据库清空: {}", e);
        }
    }

    info!("✅ 清理完成");
    Ok(())
}
