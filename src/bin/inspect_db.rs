use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query> [database_url]", args[0]);
        eprintln!("Search query matches against Sender or Subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let search_term = format!("%{}%", query);

    let database_url = args
        .get(2)
        .map(String::as_str)
        .unwrap_or("sqlite:db/mail_cache.db");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let row = sqlx::query(
        "SELECT m.id, m.sender, m.recipient, m.subject, m.timestamp, m.is_read,
                m.importance, m.deadline, m.summary, m.body, v.content, v.vector
         FROM messages m
         LEFT JOIN email_vectors v ON v.id = m.id
         WHERE m.sender LIKE ? OR m.subject LIKE ?
         ORDER BY m.timestamp DESC
         LIMIT 1",
    )
    .bind(&search_term)
    .bind(&search_term)
    .fetch_optional(&pool)
    .await?;

    let Some(row) = row else {
        println!("No messages found matching '{}'", query);
        return Ok(());
    };

    let id: String = row.get("id");
    let sender: String = row.get("sender");
    let recipient: String = row.get("recipient");
    let subject: String = row.get("subject");
    let timestamp: i64 = row.get("timestamp");
    let is_read: bool = row.get("is_read");
    let importance: i64 = row.get("importance");
    let deadline: Option<String> = row.get("deadline");
    let summary: Option<String> = row.get("summary");
    let body: Option<String> = row.get("body");
    let content: Option<String> = row.get("content");
    let vector: Option<Vec<u8>> = row.get("vector");

    let rule = "-".repeat(80);
    println!("Found Message:");
    println!("ID: {}", id);
    println!("From: {}", sender);
    println!("To: {}", recipient);
    println!("Subject: {}", subject);
    println!("Date: {}", timestamp);
    println!("Read: {}", is_read);
    println!("Importance: {}", importance);
    println!("Deadline: {}", deadline.as_deref().unwrap_or("(none)"));
    println!("{}", rule);
    println!("SUMMARY:");
    println!("{}", summary.as_deref().unwrap_or("(None)"));
    println!("{}", rule);
    println!("BODY (Raw Debug):");
    println!("{:?}", body);
    println!("{}", rule);
    match vector {
        Some(bytes) => match serde_json::from_slice::<Vec<f32>>(&bytes) {
            Ok(v) => println!("VECTOR: {} dimensions", v.len()),
            Err(e) => println!("VECTOR: unreadable ({})", e),
        },
        None => println!("VECTOR: (None)"),
    }
    if let Some(text) = content {
        println!("EMBEDDED TEXT:");
        println!("{}", text);
    }
    println!("{}", rule);

    Ok(())
}
