use {anyhow::Result, clap::Subcommand, serde_json::Value};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List configured sessions and their connection status.
    List,
    /// Ask the gateway to connect a session. Progress shows up in `list`.
    Connect { session: String },
    /// Disconnect a session.
    Disconnect { session: String },
}

pub async fn handle_sessions(action: SessionAction, base_url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    match action {
        SessionAction::List => {
            let sessions = call(client.get(format!("{base_url}/api/sessions"))).await?;
            let rows = sessions.as_array().map(Vec::as_slice).unwrap_or_default();
            if rows.is_empty() {
                println!("No sessions configured.");
            }
            for row in rows {
                println!("{}", format_row(row));
            }
        },
        SessionAction::Connect { session } => {
            let info = call(client.post(format!("{base_url}/api/sessions/{session}/connect"))).await?;
            println!("{}", format_row(&info));
        },
        SessionAction::Disconnect { session } => {
            let info =
                call(client.post(format!("{base_url}/api/sessions/{session}/disconnect"))).await?;
            println!("{}", format_row(&info));
        },
    }
    Ok(())
}

async fn call(request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("gateway unreachable (is `switchboard serve` running?): {e}"))?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        anyhow::bail!("{status}: {message}");
    }
    Ok(body)
}

fn format_row(info: &Value) -> String {
    let field = |name: &str| info.get(name).and_then(Value::as_str).unwrap_or("-");
    let default = if info.get("is_default").and_then(Value::as_bool) == Some(true) {
        " (default)"
    } else {
        ""
    };
    format!(
        "  {:<20} {:<14} {}{default}",
        field("session"),
        field("status"),
        field("name")
    )
}
