use rusoto_dynamodb::{DeleteTableInput, DynamoDb, DynamoDbClient};

use dynamodb_schema::TABLE_DEFINITIONS;

fn print_usage() {
    println!();
    println!("Usage: dynamodb_schema <command>");
    println!();
    println!("Valid values for <command>:");
    println!("\tcreate_local_tables");
    println!("\tdelete_local_tables");
    println!("\treset_local_tables");
    println!();
    println!("Set DYNAMODB_ENDPOINT to override the default http://127.0.0.1:8000.");
}

fn local_table_name(table_name: &str) -> String {
    format!("local-{}", table_name)
}

fn create_dynamodb_client() -> anyhow::Result<DynamoDbClient> {
    let request_dispatcher = rusoto_core::request::HttpClient::new()?;
    let credentials_provider = rusoto_credential::DefaultCredentialsProvider::new()?;
    let endpoint = std::env::var("DYNAMODB_ENDPOINT")
        .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
    let region = rusoto_core::Region::Custom {
        name: "local".to_string(),
        endpoint,
    };
    Ok(DynamoDbClient::new_with(
        request_dispatcher,
        credentials_provider,
        region,
    ))
}

async fn create_local_tables(dynamodb_client: &DynamoDbClient) {
    println!("Creating local tables...");
    for table_def in TABLE_DEFINITIONS.iter() {
        let table_name = local_table_name(&table_def.table_name);
        let mut table_def = table_def.clone();
        table_def.table_name = table_name.clone();
        println!("Creating table {}...", &table_def.table_name);
        let result = dynamodb_client.create_table(table_def).await;
        if let Err(e) = result {
            eprintln!("\tFailed to create table {}. Error: {}", &table_name, e);
        }
    }
    println!("Done creating local tables.");
}

async fn delete_local_tables(dynamodb_client: &DynamoDbClient) {
    println!("Deleting local tables...");
    for table_def in TABLE_DEFINITIONS.iter() {
        let table_name = local_table_name(&table_def.table_name);
        println!("Deleting table {}...", &table_name);
        let result = dynamodb_client
            .delete_table(DeleteTableInput {
                table_name: table_name.clone(),
            })
            .await;
        if let Err(e) = result {
            eprintln!("\tFailed to delete table {}. Error: {}", &table_name, e);
        }
    }
    println!("Done deleting local tables.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(1);
    }
    let dynamodb_client = create_dynamodb_client()?;
    match &args[1][..] {
        "create_local_tables" => {
            create_local_tables(&dynamodb_client).await;
        }
        "delete_local_tables" => {
            delete_local_tables(&dynamodb_client).await;
        }
        "reset_local_tables" => {
            delete_local_tables(&dynamodb_client).await;
            create_local_tables(&dynamodb_client).await;
        }
        _ => {
            print_usage();
            std::process::exit(1);
        }
    }
    Ok(())
}
