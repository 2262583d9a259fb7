pub mod delivery;
pub mod discord;

pub use delivery::DeliveryClient;
pub use discord::{render, DiscordEmbed, DiscordWebhookPayload};
