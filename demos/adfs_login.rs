use adfs_duo_flow::{AdfsFlow, Authentication};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let flow = AdfsFlow::new(std::env::var("ADFS_PASSWORD")?).await?;

    match flow.login().await? {
        Authentication::Roles(roles) => {
            for account in roles.accounts() {
                println!("{account}");
                for role in roles.by_account_id(&account.id) {
                    println!("  {}", role.arn);
                }
            }
        }
        Authentication::Duo(devices) => {
            println!("DUO challenge required");
            for device in &devices {
                let factors: Vec<_> = device.factors().iter().map(|factor| factor.name()).collect();
                println!("  {}: {}", device.name(), factors.join(", "));
            }
        }
    }

    Ok(())
}
