#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    training_scheduler::run().await
}
