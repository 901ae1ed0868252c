//! Telegram bot front-end.
//!
//! `/start` offers a language menu. Picking a language registers the user and replies with a
//! localized greeting and a button that opens the mini-app. `/admin` hands operators a button
//! that opens the admin panel.
use anyhow::Context as _;
use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, WebAppInfo},
    utils::command::BotCommands,
};
use tracing::{error, info, warn};
use url::Url;

use crate::{
    admin::AdminService,
    db::Db,
    models::Language,
    users::{self, UserInit},
};

/// Prefix of the callback data sent by the language menu, e.g. `lang_uz`.
const LANGUAGE_CALLBACK_PREFIX: &str = "lang_";

const LANGUAGE_PROMPT: &str = "🌍 Tilni tanlang / Выберите язык / Choose your language";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub(crate) enum Command {
    /// Choose a language and open the mini-app.
    Start,
    /// Open the admin panel.
    Admin,
}

/// Shared state injected into the bot handlers.
#[derive(Clone)]
pub(crate) struct BotContext {
    pub db: Db,
    pub admin: AdminService,
    pub mini_app_url: Url,
}

pub(crate) fn parse_language_callback(data: &str) -> Option<Language> {
    data.strip_prefix(LANGUAGE_CALLBACK_PREFIX)?.parse().ok()
}

/// The admin panel URL for operator `telegram_id`: `<base>/admin.html?admin_tg_id=<id>`.
pub(crate) fn admin_launch_url(base: &Url, telegram_id: i64) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    let path = format!("{}/admin.html", url.path().trim_end_matches('/'));
    url.set_path(&path);
    let _pairs = url
        .query_pairs_mut()
        .append_pair("admin_tg_id", &telegram_id.to_string());
    url
}

pub(crate) fn greeting(language: Language, name: &str) -> String {
    match language {
        Language::Uz => format!(
            "Salom, {name}! 👋\n\n\
             Ekopatrulga xush kelibsiz.\n\n\
             📍 Xaritada chiqindilarni belgilang.\n\
             🧹 Ifloslangan joylarni tozalang.\n\
             💰 Virtual mukofotlar oling.\n\n\
             Boshlash uchun quyidagi tugmani bosing!"
        ),
        Language::Ru => format!(
            "Привет, {name}! 👋\n\n\
             Добро пожаловать в Экопатруль.\n\n\
             📍 Отмечай мусор на карте.\n\
             🧹 Убирай загрязнения.\n\
             💰 Получай виртуальные награды.\n\n\
             Нажми на кнопку ниже, чтобы начать!"
        ),
        Language::En => format!(
            "Hi, {name}! 👋\n\n\
             Welcome to EcoPatrol.\n\n\
             📍 Mark litter on the map.\n\
             🧹 Clean up polluted spots.\n\
             💰 Earn virtual rewards.\n\n\
             Tap the button below to get started!"
        ),
    }
}

fn launch_label(language: Language) -> &'static str {
    match language {
        Language::Uz => "Ekopatrulni ochish 🌍",
        Language::Ru => "Открыть Экопатруль 🌍",
        Language::En => "Open EcoPatrol 🌍",
    }
}

fn language_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("🇺🇿 O'zbekcha", "lang_uz"),
        InlineKeyboardButton::callback("🇷🇺 Русский", "lang_ru"),
        InlineKeyboardButton::callback("🇬🇧 English", "lang_en"),
    ]])
}

fn web_app_keyboard(label: &str, url: Url) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::web_app(
        label,
        WebAppInfo { url },
    )]])
}

async fn handle_command(bot: Bot, ctx: BotContext, msg: Message, cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Start => {
            let _msg = bot
                .send_message(msg.chat.id, LANGUAGE_PROMPT)
                .reply_markup(language_keyboard())
                .await?;
        }
        Command::Admin => {
            let Some(from) = msg.from.as_ref() else {
                return Ok(());
            };
            let telegram_id = i64::try_from(from.id.0).context("telegram id out of range")?;

            if !ctx.admin.is_operator(telegram_id) {
                warn!(telegram_id, "refused /admin for non-operator");
                let _msg = bot
                    .send_message(msg.chat.id, "⛔ You are not an administrator.")
                    .await?;
                return Ok(());
            }

            let url = admin_launch_url(&ctx.mini_app_url, telegram_id);
            let _msg = bot
                .send_message(msg.chat.id, "🛠 Admin panel")
                .reply_markup(web_app_keyboard("Open admin panel", url))
                .await?;
        }
    }

    Ok(())
}

async fn handle_callback(bot: Bot, ctx: BotContext, q: CallbackQuery) -> anyhow::Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(language) = q.data.as_deref().and_then(parse_language_callback) else {
        return Ok(());
    };
    let telegram_id = i64::try_from(q.from.id.0).context("telegram id out of range")?;

    let user = users::upsert(
        &ctx.db,
        &UserInit {
            telegram_id,
            username: q.from.username.clone(),
            first_name: Some(q.from.first_name.clone()),
            last_name: q.from.last_name.clone(),
            language: Some(language),
            ..Default::default()
        },
    )
    .await?;
    info!(user = user.id, language = language.code(), "language selected");

    let _msg = bot
        .send_message(q.from.id, greeting(language, &q.from.first_name))
        .reply_markup(web_app_keyboard(
            launch_label(language),
            ctx.mini_app_url.clone(),
        ))
        .await?;
    Ok(())
}

/// Poll for updates until the bot is shut down.
pub(crate) async fn run(bot: Bot, ctx: BotContext) {
    let handler = dptree::entry()
        .branch(Update::filter_message().filter_command::<Command>().endpoint(
            |bot: Bot, ctx: BotContext, msg: Message, cmd: Command| async move {
                if let Err(e) = handle_command(bot, ctx, msg, cmd).await {
                    error!("command handler failed: {e:#}");
                }
                Ok::<(), anyhow::Error>(())
            },
        ))
        .branch(Update::filter_callback_query().endpoint(
            |bot: Bot, ctx: BotContext, q: CallbackQuery| async move {
                if let Err(e) = handle_callback(bot, ctx, q).await {
                    error!("callback handler failed: {e:#}");
                }
                Ok::<(), anyhow::Error>(())
            },
        ));

    info!("telegram bot started");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_callbacks() {
        assert_eq!(parse_language_callback("lang_uz"), Some(Language::Uz));
        assert_eq!(parse_language_callback("lang_ru"), Some(Language::Ru));
        assert_eq!(parse_language_callback("lang_en"), Some(Language::En));
        assert_eq!(parse_language_callback("lang_de"), None);
        assert_eq!(parse_language_callback("uz"), None);
    }

    #[test]
    fn admin_url_embeds_operator_id() -> anyhow::Result<()> {
        let base = Url::parse("https://app.example")?;
        assert_eq!(
            admin_launch_url(&base, 42).as_str(),
            "https://app.example/admin.html?admin_tg_id=42"
        );

        let base = Url::parse("https://app.example/mini/?v=2")?;
        assert_eq!(
            admin_launch_url(&base, 7).as_str(),
            "https://app.example/mini/admin.html?admin_tg_id=7"
        );
        Ok(())
    }

    #[test]
    fn greets_in_the_chosen_language() {
        assert!(greeting(Language::Ru, "Анна").starts_with("Привет, Анна!"));
        assert!(greeting(Language::En, "Ann").contains("EcoPatrol"));
        assert!(greeting(Language::Uz, "Ann").starts_with("Salom, Ann!"));
    }

    #[test]
    fn commands_parse() {
        assert_eq!(Command::parse("/start", "ecopatrol_bot").ok(), Some(Command::Start));
        assert_eq!(Command::parse("/admin", "ecopatrol_bot").ok(), Some(Command::Admin));
    }
}
