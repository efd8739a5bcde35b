//! cross-post - Publish content to several social platforms at once

use chrono::Utc;
use clap::Parser;
use libcrosscast::logging::LoggingConfig;
use libcrosscast::scheduling::parse_schedule;
use libcrosscast::types::PostContent;
use libcrosscast::{
    Config, CrosscastError, Database, DispatchOutcome, DispatchRequest, Platform, PublishDispatcher,
    PublishResult, Result, ScheduledPost, ScheduledPostStore,
};
use std::io::{IsTerminal, Read};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cross-post")]
#[command(version)]
#[command(about = "Publish content to Instagram, Facebook, YouTube and TikTok")]
#[command(long_about = "\
cross-post - Publish content to several social platforms at once

DESCRIPTION:
    Publishes a caption with an optional image or video to every platform
    named with --platform, using the credentials stored for --user. With
    --at the post is queued instead and cross-send publishes it when due.

USAGE:
    # Text post to a Facebook page
    cross-post --platform facebook \"Doors open at 8\"

    # Video to TikTok and YouTube
    cross-post -p tiktok,youtube --video https://cdn.example.com/clip.mp4 \"New clip\"

    # Queue for later
    echo \"Weekly recap\" | cross-post -p facebook --at \"tomorrow 9am\"

EXIT CODES:
    0 - Published everywhere (or queued)
    1 - At least one platform failed, or a runtime error
    2 - Configuration or authentication error
    3 - Invalid input
")]
struct Cli {
    /// Caption to publish (reads from stdin if not provided)
    content: Option<String>,

    /// Target platform(s), comma-separated
    #[arg(short, long, required = true, value_delimiter = ',')]
    platform: Vec<String>,

    /// User whose connected accounts are used
    #[arg(short, long, env = "CROSSCAST_USER", default_value = "default")]
    user: String,

    /// Public URL of an image to attach
    #[arg(long, value_name = "URL")]
    image: Option<String>,

    /// Public URL of a video to attach
    #[arg(long, value_name = "URL")]
    video: Option<String>,

    /// Requested privacy level (platform specific, e.g. SELF_ONLY, unlisted)
    #[arg(long)]
    privacy: Option<String>,

    /// Schedule instead of publishing now ("30m", "tomorrow 9am", RFC 3339)
    #[arg(long, value_name = "WHEN")]
    at: Option<String>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let json = match cli.format.as_str() {
        "text" => false,
        "json" => true,
        other => {
            return Err(CrosscastError::InvalidInput(format!(
                "Invalid format '{}'. Valid options: text, json",
                other
            )))
        }
    };

    let caption = read_caption(cli.content)?;
    let config = Config::load()?;
    let db = Arc::new(Database::new(&config.database.path).await?);

    if let Some(at) = cli.at.as_deref() {
        let platforms = cli
            .platform
            .iter()
            .map(|name| name.parse::<Platform>().map(|p| p.as_str().to_string()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CrosscastError::InvalidInput)?;

        let scheduled_at = parse_schedule(at, Utc::now())?;
        let post = ScheduledPost::new(
            cli.user,
            platforms,
            PostContent {
                caption,
                image_url: cli.image,
                video_url: cli.video,
                privacy_level: cli.privacy,
            },
            scheduled_at,
            config.scheduling.max_retries,
        );
        db.schedule(&post).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&post)?);
        } else {
            println!("{} scheduled for {}", post.id, post.scheduled_at.to_rfc3339());
        }
        return Ok(0);
    }

    let dispatcher = PublishDispatcher::from_config(&config, db)?;
    let results = dispatcher
        .dispatch(&DispatchRequest {
            caption,
            image_url: cli.image,
            video_url: cli.video,
            platforms: cli.platform,
            user_id: cli.user,
            privacy_level: cli.privacy,
        })
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            println!("{}", describe(result));
        }
    }

    Ok(match DispatchOutcome::classify(&results) {
        DispatchOutcome::AllSuccess => 0,
        DispatchOutcome::Partial | DispatchOutcome::AllFailure => 1,
    })
}

fn read_caption(content: Option<String>) -> Result<String> {
    let caption = match content {
        Some(content) => content,
        None if !std::io::stdin().is_terminal() => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| CrosscastError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
            buffer
        }
        None => String::new(),
    };

    let caption = caption.trim().to_string();
    if caption.is_empty() {
        return Err(CrosscastError::InvalidInput(
            "Caption cannot be empty".to_string(),
        ));
    }
    Ok(caption)
}

fn describe(result: &PublishResult) -> String {
    if result.success {
        let mut line = format!(
            "{}: published {}",
            result.platform,
            result.external_id.as_deref().unwrap_or("")
        );
        if let Some(url) = &result.url {
            line.push_str(&format!(" {}", url));
        }
        if let Some(warning) = &result.warning {
            line.push_str(&format!(" (warning: {})", warning));
        }
        return line;
    }

    let mut line = format!(
        "{}: failed [{}] {}",
        result.platform,
        result.fail_reason.map(|r| r.as_str()).unwrap_or("unknown"),
        result.error.as_deref().unwrap_or("")
    );
    for hint in &result.recommendations {
        line.push_str(&format!("\n  - {}", hint));
    }
    line
}
