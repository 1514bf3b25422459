use adfs_duo_flow::{AdfsFlow, Authentication};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let flow = AdfsFlow::new(std::env::var("ADFS_PASSWORD")?).await?;

    let roles = match flow.login().await? {
        Authentication::Roles(roles) => roles,
        Authentication::Duo(devices) => {
            let factor = devices
                .iter()
                .find_map(|device| device.factor("Duo Push"))
                .ok_or("no device supports Duo Push")?;
            println!("Approve the push sent to {}", factor.device());
            factor.load_roles(flow.session(), None).await?
        }
    };

    let role = match std::env::var("ADFS_ROLE_ARN") {
        Ok(arn) => roles.by_arn(&arn)?,
        Err(_) => roles.iter().next().ok_or("no roles granted")?,
    };
    println!("Assuming {role}");

    let credentials = flow.assume_role(role).await?;

    dbg!(credentials);

    Ok(())
}
