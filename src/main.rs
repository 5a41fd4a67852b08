fn main() -> anyhow::Result<()> {
    mealscan_lib::run()
}
