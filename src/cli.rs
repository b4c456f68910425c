use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server.
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:8000.
        /// Overrides server.listen from config.yaml.
        #[clap(long)]
        listen: Option<String>,
    },

    /// Embed every job in the catalog CSV and store the vectors,
    /// so the server starts with a warm catalog.
    IndexJobs {
        /// Jobs CSV to index instead of catalog.jobs_csv
        #[clap(long)]
        jobs: Option<PathBuf>,
    },

    /// Rank catalog jobs against a resume.
    MatchJobs {
        /// Resume file (.pdf or plain text)
        #[clap(short, long)]
        resume: PathBuf,

        /// Minimum similarity [0.0, 1.0].
        /// Defaults to matching.default_threshold
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Results to show when no job clears the threshold
        #[clap(long)]
        fallback_size: Option<usize>,
    },

    /// Rank resumes against a job description.
    MatchCandidates {
        /// Job description file (.pdf or plain text)
        #[clap(short, long)]
        job: PathBuf,

        /// Resume files (.pdf or plain text)
        #[clap(short, long = "resume", num_args = 1.., required = true)]
        resumes: Vec<PathBuf>,

        /// Minimum similarity [0.0, 1.0].
        /// Defaults to matching.default_threshold
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Results to show when no resume clears the threshold
        #[clap(long)]
        fallback_size: Option<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_match_candidates() {
        let args = Args::try_parse_from([
            "hirematch",
            "match-candidates",
            "--job",
            "job.txt",
            "--resume",
            "a.pdf",
            "b.pdf",
            "-r",
            "c.txt",
            "--threshold",
            "0.4",
        ])
        .unwrap();

        match args.command {
            Command::MatchCandidates {
                job,
                resumes,
                threshold,
                fallback_size,
            } => {
                assert_eq!(job, PathBuf::from("job.txt"));
                assert_eq!(resumes.len(), 3);
                assert_eq!(threshold, Some(0.4));
                assert_eq!(fallback_size, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_match_candidates_needs_a_resume() {
        assert!(Args::try_parse_from(["hirematch", "match-candidates", "--job", "job.txt"]).is_err());
    }

    #[test]
    fn test_parse_match_jobs() {
        let args =
            Args::try_parse_from(["hirematch", "match-jobs", "-r", "cv.pdf", "--fallback-size", "3"])
                .unwrap();
        assert!(matches!(
            args.command,
            Command::MatchJobs {
                threshold: None,
                fallback_size: Some(3),
                ..
            }
        ));
    }
}
