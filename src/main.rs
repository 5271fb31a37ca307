fn main() -> anyhow::Result<()> {
    tagdash::cli::run()
}
