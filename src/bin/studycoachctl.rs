// admin tool for managing student accounts
use clap::Command;
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json as SqlxJson;
use sqlx::Row;
use std::{
    env,
    io::{self, Write},
};

use studycoach::auth::AuthService;
use studycoach::Subject;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = PgPoolOptions::new().connect(&db_url).await?;
    let auth = AuthService::from_env()?;

    let matches = Command::new("studycoachctl")
        .subcommand(Command::new("add").about("Add a new student account"))
        .subcommand(
            Command::new("reset")
                .aliases(["r", "reset-password"])
                .about("Reset an account password"),
        )
        .subcommand(
            Command::new("list")
                .aliases(["ls", "l"])
                .about("List registered accounts"),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("add", _)) => add_user(db, auth).await?,
        Some(("reset", _)) => reset_pswd(db, auth).await?,
        Some(("list", _)) => list_users(db).await?,
        _ => {
            eprintln!("Invalid command, run studycoachctl help");
        }
    }
    Ok(())
}

async fn add_user(
    db: sqlx::PgPool,
    auth: AuthService,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut user_id = String::new();
    get_response("Enter unique userID", &mut user_id)?;

    let mut name = String::new();
    get_response("Enter name", &mut name)?;

    let mut grade = String::new();
    get_response("Enter grade (e.g. middleschool-1)", &mut grade)?;

    let mut school = String::new();
    get_response("Enter school", &mut school)?;

    let mut password = String::new();
    get_response("Enter password", &mut password)?;

    let hashed = auth.hash_password(password.trim())?;

    let mut subjects: Vec<Subject> = Vec::new();
    loop {
        print!("Would you like to add a subject? [Y/n]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        match input.to_lowercase().trim() {
            "y" | "yes" | "" => {
                let mut subject_name = String::new();
                get_response("Subject name", &mut subject_name)?;
                let mut publish = String::new();
                get_response("Publisher", &mut publish)?;
                let mut workbook = String::new();
                get_response("Workbook", &mut workbook)?;
                let mut scope = String::new();
                get_response("Current scope", &mut scope)?;

                subjects.push(Subject {
                    name: subject_name.trim().to_string(),
                    publish: publish.trim().to_string(),
                    workbook: workbook.trim().to_string(),
                    scope: scope.trim().to_string(),
                });
            }
            "n" | "no" => break,
            _ => {
                println!("Invalid input");
                continue;
            }
        }
    }

    let row = sqlx::query(
        "INSERT INTO users (user_id, name, school, password, grade, subjects)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id",
    )
    .bind(user_id.trim())
    .bind(name.trim())
    .bind(school.trim())
    .bind(&hashed)
    .bind(grade.trim())
    .bind(SqlxJson(&subjects))
    .fetch_one(&db)
    .await;

    match row {
        Ok(row) => println!("User created with id: {}", row.get::<i32, _>("id")),
        Err(e) => eprintln!("{}", e),
    }

    Ok(())
}

async fn reset_pswd(
    db: sqlx::PgPool,
    auth: AuthService,
) -> Result<(), Box<dyn std::error::Error>> {
    let users = sqlx::query("SELECT id, user_id FROM users ORDER BY id")
        .fetch_all(&db)
        .await?;

    let mut i = 0;
    while i < users.len() {
        println!(
            "({}) {}: {}",
            i,
            users[i].get::<i32, _>("id"),
            users[i].get::<String, _>("user_id")
        );
        i += 1;
    }

    let mut idx = String::new();
    get_response("Num of password to reset", &mut idx)?;
    let idx_int = idx.trim().parse::<usize>()?;

    let mut password = String::new();
    get_response("Enter new password", &mut password)?;
    let hashed = auth.hash_password(password.trim())?;

    let query = sqlx::query("UPDATE users SET password = $1 WHERE id = $2")
        .bind(&hashed)
        .bind(users[idx_int].get::<i32, _>("id"))
        .execute(&db)
        .await?;

    println!("{} rows affected", query.rows_affected());

    Ok(())
}

async fn list_users(db: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
    let users = sqlx::query("SELECT id, user_id, name, grade FROM users ORDER BY id")
        .fetch_all(&db)
        .await?;

    for user in &users {
        println!(
            "{}: {} ({}, {})",
            user.get::<i32, _>("id"),
            user.get::<String, _>("user_id"),
            user.get::<String, _>("name"),
            user.get::<String, _>("grade"),
        );
    }

    Ok(())
}

fn get_response(question: &str, output: &mut String) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}: ", question);
    io::stdout().flush()?;

    io::stdin().read_line(output)?;

    Ok(())
}
