use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "kontain",
    version,
    about = "Registry facades that synthesize container images on demand",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a registry facade backed by one transformation strategy
    Serve {
        #[arg(value_enum, help = "How images are produced on a cache miss")]
        strategy: StrategyKind,

        #[arg(short, long, env = "PORT", default_value = "8080")]
        port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    /// Copy upstream images unchanged
    Mirror,
    /// Squash upstream images into a single layer
    Flatten,
    /// Generate images of random layers, sized by the tag (NxM)
    Random,
    /// Produce a small image after the delay named by the tag
    Wait,
    /// Build an image with the packages named by the repository path
    Packages,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli =
            Cli::try_parse_from(["kontain", "serve", "flatten", "--port", "9000", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Serve {
                strategy,
                port,
                host,
            } => {
                assert_eq!(strategy, StrategyKind::Flatten);
                assert_eq!(port, 9000);
                assert_eq!(host, "127.0.0.1");
            }
        }
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["kontain", "serve", "estargz"]).is_err());
    }
}
