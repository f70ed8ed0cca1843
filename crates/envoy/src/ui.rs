use std::io::{self, IsTerminal, Write};

use anyhow::{Result, anyhow, bail};
use dialoguer::Password;
use parley_shared::{Exchange, ExchangeId};
use tracing::debug;

use crate::client::{ApiClient, ClientError};
use crate::conversation::{ChatError, ConversationList, ConversationStore};
use crate::forms::{LoginForm, RegisterForm};
use crate::gate::{self, Route, View};

const PREVIEW_CHARS: usize = 40;

enum Next {
    Show(View),
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Help,
    Quit,
    Logout,
    History,
    Show(ExchangeId),
    Delete(ExchangeId),
    Dismiss,
    Send(&'a str),
    Invalid(&'static str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Send(line);
        };
        // A doubled slash sends the text with one slash removed.
        if rest.starts_with('/') {
            return Command::Send(rest);
        }

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or("");
        let id = parts.next().and_then(|s| s.trim_start_matches('#').parse().ok());

        match (name, id) {
            ("help", _) => Command::Help,
            ("quit" | "exit", _) => Command::Quit,
            ("logout", _) => Command::Logout,
            ("history", _) => Command::History,
            ("dismiss", _) => Command::Dismiss,
            ("show", Some(id)) => Command::Show(id),
            ("delete", Some(id)) => Command::Delete(id),
            ("show" | "delete", None) => Command::Invalid("expects an exchange id, e.g. /show 3"),
            _ => Command::Invalid("unknown command, try /help"),
        }
    }
}

/// Runs the gated screen loop starting from `start` until the user quits.
pub async fn interactive_chat(client: ApiClient, start: View) -> Result<()> {
    let conversation = ConversationStore::new(client.clone());
    let mut requested = start;

    loop {
        let authenticated = client.session().is_authenticated();
        let view = match gate::decide(authenticated, requested) {
            Route::Redirect(to) => {
                debug!(from = requested.path(), to = to.path(), "Redirecting");
                requested = to;
                continue;
            }
            Route::Render(view) => view,
        };

        let next = match view {
            View::Login => login_screen(&client).await?,
            View::Register => register_screen(&client).await?,
            View::Chat => chat_screen(&client, &conversation).await?,
            View::Root => continue,
        };

        match next {
            Next::Show(view) => requested = view,
            Next::Quit => break,
        }
    }

    println!("Goodbye!");
    Ok(())
}

pub async fn sign_in(client: &ApiClient) -> Result<()> {
    authenticate(client, View::Login).await
}

pub async fn sign_up(client: &ApiClient) -> Result<()> {
    authenticate(client, View::Register).await
}

// Bounces between the two auth screens until one of them starts a session.
async fn authenticate(client: &ApiClient, start: View) -> Result<()> {
    let mut view = start;
    loop {
        let next = match view {
            View::Register => register_screen(client).await?,
            _ => login_screen(client).await?,
        };
        match next {
            Next::Show(to @ (View::Login | View::Register)) => view = to,
            Next::Show(_) => return Ok(()),
            Next::Quit => bail!("Cancelled"),
        }
    }
}

/// Fails unless the gate would let the user into the chat view.
pub fn require_session(client: &ApiClient) -> Result<()> {
    match gate::decide(client.session().is_authenticated(), View::Chat) {
        Route::Render(_) => Ok(()),
        Route::Redirect(_) => bail!("Not signed in. Run `parley login` first."),
    }
}

pub async fn single_message(client: ApiClient, message: String) -> Result<()> {
    require_session(&client)?;
    let conversation = ConversationStore::new(client);

    let exchange = conversation.send_message(&message).await.map_err(chat_failure)?;
    render_exchange(&exchange);
    Ok(())
}

pub async fn print_history(client: ApiClient) -> Result<()> {
    require_session(&client)?;
    let conversation = ConversationStore::new(client);

    conversation.load_history().await.map_err(chat_failure)?;
    render_list(&conversation.list());
    Ok(())
}

pub async fn delete_exchange(client: ApiClient, id: ExchangeId) -> Result<()> {
    require_session(&client)?;
    let conversation = ConversationStore::new(client);

    conversation.delete_exchange(id).await.map_err(chat_failure)?;
    println!("Deleted #{id}");
    Ok(())
}

pub async fn whoami(client: ApiClient) -> Result<()> {
    require_session(&client)?;

    match client.profile().await {
        Ok(user) => {
            match user.email.as_deref() {
                Some(email) if !email.is_empty() => println!("{} <{}>", user.username, email),
                _ => println!("{}", user.username),
            }
            Ok(())
        }
        Err(ClientError::Unauthorized) => Err(chat_failure(ChatError::SessionExpired)),
        Err(e) => Err(e.into()),
    }
}

fn chat_failure(error: ChatError) -> anyhow::Error {
    match error {
        ChatError::EmptyQuery => anyhow!("Nothing to send"),
        ChatError::SessionExpired => {
            anyhow!("Session expired. Run `parley login` to sign in again.")
        }
        other => anyhow!(other),
    }
}

async fn login_screen(client: &ApiClient) -> Result<Next> {
    println!("\n== Log in ==  (/register to create an account, /quit to exit)");
    let mut form = LoginForm::default();

    loop {
        let Some(username) = prompt("Username: ")? else {
            return Ok(Next::Quit);
        };
        match username.trim() {
            "/quit" => return Ok(Next::Quit),
            "/register" => return Ok(Next::Show(View::Register)),
            "" => continue,
            _ => {}
        }
        form.set_username(username.trim());

        let Some(password) = prompt_secret("Password")? else {
            return Ok(Next::Quit);
        };
        form.set_password(password);

        match form.submit(client).await {
            Ok(user) => {
                println!("Welcome back, {}!", user.username);
                return Ok(Next::Show(View::Chat));
            }
            Err(e) => eprintln!("{e}\n"),
        }
    }
}

async fn register_screen(client: &ApiClient) -> Result<Next> {
    println!("\n== Sign up ==  (/login if you already have an account, /quit to exit)");
    let mut form = RegisterForm::default();

    loop {
        let Some(username) = prompt("Username: ")? else {
            return Ok(Next::Quit);
        };
        match username.trim() {
            "/quit" => return Ok(Next::Quit),
            "/login" => return Ok(Next::Show(View::Login)),
            "" => continue,
            _ => {}
        }
        form.set_username(username.trim());

        let Some(email) = prompt("Email: ")? else {
            return Ok(Next::Quit);
        };
        form.set_email(email.trim());

        let Some(password) = prompt_secret("Password")? else {
            return Ok(Next::Quit);
        };
        form.set_password(password);

        match form.submit(client).await {
            Ok(user) => {
                println!("Welcome, {}!", user.username);
                return Ok(Next::Show(View::Chat));
            }
            Err(e) => eprintln!("{e}\n"),
        }
    }
}

async fn chat_screen(client: &ApiClient, conversation: &ConversationStore) -> Result<Next> {
    let session = client.session();
    let transitions = session.subscribe();

    // History is always re-fetched on entry.
    conversation.reset();
    let username = session
        .session()
        .map(|s| s.user.username)
        .unwrap_or_default();
    println!("\nGreetings! {username}. Type /help for commands.\n");

    if conversation.load_history().await.is_ok() {
        render_list(&conversation.list());
    }

    loop {
        // Any session transition sends us back through the gate.
        if transitions.has_changed().unwrap_or(true) {
            return Ok(Next::Show(View::Chat));
        }

        if let Some(error) = conversation.error() {
            eprintln!("! {error}  (/dismiss to hide)");
        }

        let Some(line) = prompt("You: ")? else {
            return Ok(Next::Quit);
        };

        match Command::parse(&line) {
            Command::Help => print_help(),
            Command::Quit => return Ok(Next::Quit),
            Command::Logout => {
                session.logout();
                conversation.reset();
                return Ok(Next::Show(View::Login));
            }
            Command::History => {
                if conversation.load_history().await.is_ok() {
                    render_list(&conversation.list());
                }
            }
            Command::Show(id) => {
                if conversation.select(id) {
                    if let Some(exchange) = conversation.selected() {
                        render_exchange(&exchange);
                    }
                } else {
                    eprintln!("No exchange #{id} in your history");
                }
            }
            Command::Delete(id) => {
                if conversation.delete_exchange(id).await.is_ok() {
                    println!("Deleted #{id}");
                    render_list(&conversation.list());
                }
            }
            Command::Dismiss => conversation.dismiss_error(),
            Command::Invalid(reason) => eprintln!("{reason}"),
            Command::Send(text) => {
                conversation.set_draft(text);
                match conversation.submit_draft().await {
                    Ok(exchange) => render_exchange(&exchange),
                    Err(ChatError::EmptyQuery) => {}
                    Err(ChatError::SessionExpired) => eprintln!("Session expired, please log in again."),
                    // Banner is shown on the next prompt.
                    Err(ChatError::Failed(_) | ChatError::Abandoned) => {}
                }
            }
        }
    }
}

fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim_end_matches(['\r', '\n']).to_string()))
}

// Masked on a terminal; piped input is read as a plain line.
fn prompt_secret(label: &str) -> Result<Option<String>> {
    if !io::stdin().is_terminal() {
        return prompt(&format!("{label}: "));
    }

    match Password::new().with_prompt(label).interact() {
        Ok(secret) => Ok(Some(secret)),
        Err(dialoguer::Error::IO(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  <text>          Send a message");
    println!("  //<text>        Send a message starting with /");
    println!("  /history        Reload and list previous chats");
    println!("  /show <id>      Show a previous chat");
    println!("  /delete <id>    Delete a chat");
    println!("  /dismiss        Hide the current error");
    println!("  /logout         Sign out");
    println!("  /quit           Exit");
}

fn render_list(list: &ConversationList) {
    if list.is_empty() {
        println!("No chats yet\n");
        return;
    }

    let selected = list.selected().map(|e| e.id);
    println!("Chat history:");
    for exchange in list.exchanges() {
        let marker = if selected == Some(exchange.id) { '>' } else { ' ' };
        println!(
            "{marker} #{:<5} {:<43} {}",
            exchange.id,
            preview(&exchange.query, PREVIEW_CHARS),
            exchange.created_at.format("%Y-%m-%d")
        );
    }
    println!();
}

fn render_exchange(exchange: &Exchange) {
    let at = exchange.created_at.format("%Y-%m-%d %H:%M");
    println!("\n[{at}] You: {}", exchange.query);
    println!("[{at}] Assistant: {}\n", exchange.response);
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_sent_verbatim() {
        assert_eq!(Command::parse("  hello there "), Command::Send("  hello there "));
        assert_eq!(Command::parse("   "), Command::Send("   "));
    }

    #[test]
    fn slash_commands_parse_ids() {
        assert_eq!(Command::parse("/show 3"), Command::Show(3));
        assert_eq!(Command::parse("/delete #12"), Command::Delete(12));
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert!(matches!(Command::parse("/delete"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/show abc"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/frobnicate"), Command::Invalid(_)));
    }

    #[test]
    fn doubled_slash_sends_a_leading_slash() {
        assert_eq!(
            Command::parse("//usr/bin is where binaries live?"),
            Command::Send("/usr/bin is where binaries live?")
        );
        assert_eq!(Command::parse("//help"), Command::Send("/help"));
        assert_eq!(Command::parse("/help"), Command::Help);
    }

    #[test]
    fn previews_truncate_on_characters() {
        assert_eq!(preview("short", 40), "short");
        assert_eq!(preview("ééééé", 3), "ééé...");
    }
}
