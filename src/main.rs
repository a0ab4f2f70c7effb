//! appraise-notes - command line access to review notes

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use appraise_notes::client::{ClientConfig, ReviewClient};
use appraise_notes::record::Review;

#[derive(Parser)]
#[command(name = "appraise-notes", version, about = "Code review records stored in git notes")]
struct Cli {
    /// Path inside the repository
    #[arg(short = 'C', long, default_value = ".")]
    repo: PathBuf,

    /// Remote to exchange notes with
    #[arg(long, default_value = "origin")]
    remote: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync notes with the remote
    Sync,
    /// List current reviews, newest first
    List,
    /// Show the current review of a commit
    Show { target: String },
    /// List comments on a commit
    Comments { target: String },
    /// Comment on a commit
    Comment {
        target: String,
        text: String,
        /// Id of the comment being replied to
        #[arg(long)]
        parent: Option<String>,
    },
    /// Request a review of a branch
    Request {
        /// Branch under review
        review_ref: String,
        /// Branch the review targets
        #[arg(long, default_value = "master")]
        target_ref: String,
        /// Comma separated reviewers
        #[arg(long, default_value = "")]
        reviewers: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show the paths changed by a review
    Diff { target: String },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("appraise_notes=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = ClientConfig::new(&cli.repo).remote(&cli.remote);
    let client = ReviewClient::open(config).with_context(|| format!("opening {}", cli.repo.display()))?;

    match cli.command {
        Command::Sync => {
            let report = client.sync()?;
            println!("comments: {:?}", report.comments);
            println!("reviews:  {:?}", report.reviews);
        }
        Command::List => {
            for result in client.list_reviews()? {
                let marker = if result.is_current_user_reviewer() { "*" } else { " " };
                println!(
                    "{} {} {}",
                    marker,
                    &result.hash[..12],
                    result.review.description.as_deref().unwrap_or("")
                );
            }
        }
        Command::Show { target } => {
            let result = client.get_review(&target)?;
            println!("{}", serde_json::to_string_pretty(&result.review)?);
        }
        Command::Comments { target } => {
            for result in client.list_comments(&target)? {
                let c = &result.comment;
                println!(
                    "{} {}{}: {}",
                    &result.id[..12],
                    c.author.as_deref().unwrap_or("?"),
                    if c.is_resolved() { " (resolved)" } else { "" },
                    c.description.as_deref().unwrap_or("")
                );
            }
        }
        Command::Comment { target, text, parent } => {
            let mut comment = appraise_notes::record::Comment::text(text);
            comment.parent = parent;
            let written = client.write_comment(&target, comment)?;
            println!("{}", written.id);
        }
        Command::Request {
            review_ref,
            target_ref,
            reviewers,
            description,
        } => {
            let mut review = Review {
                review_ref: Some(review_ref.clone()),
                target_ref: Some(target_ref.clone()),
                description,
                ..Default::default()
            };
            review.set_reviewers_string(&reviewers);
            let commit = client.review_commit(&review_ref, &target_ref)?;
            let hash = client.create_review(&commit.to_string(), review)?;
            println!("{}", hash);
        }
        Command::Diff { target } => {
            for change in client.review_diff(&target)? {
                println!("{:?}\t{}", change.status, change.path.display());
            }
        }
    }

    Ok(())
}
