use clap::Subcommand;

pub mod config_show;
pub mod publish;
pub mod tail;

#[derive(Subcommand)]
pub enum Command {
    /// Connect to the relay and stream real-time events to stdout.
    Tail(tail::TailArgs),
    /// Start a publish job and follow it until it finishes.
    Publish(publish::PublishArgs),
    /// Print the resolved engine configuration.
    ConfigShow(config_show::ConfigShowArgs),
}

pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Tail(args) => tail::run(args).await,
        Command::Publish(args) => publish::run(args).await,
        Command::ConfigShow(args) => config_show::run(args),
    }
}
