use chrono::NaiveDate;

use crate::db::UserRow;

/// Spreadsheet apps need the BOM to detect UTF-8 with non-ASCII names.
pub const UTF8_BOM: &str = "\u{FEFF}";

const HEADERS: [&str; 8] = ["Name", "Username", "Phone", "Company", "Plan", "Status", "Meta Account ID", "Joined"];

pub fn export_filename(today: NaiveDate) -> String {
  format!("users_{}.csv", today.format("%Y-%m-%d"))
}

/// Every cell quoted, `\n` line endings, BOM prefixed.
pub fn export_users_csv(users: &[UserRow]) -> Result<String, csv::Error> {
  let mut writer = csv::WriterBuilder::new()
    .quote_style(csv::QuoteStyle::Always)
    .terminator(csv::Terminator::Any(b'\n'))
    .from_writer(Vec::new());

  writer.write_record(HEADERS)?;
  for user in users {
    let joined = user.created_at.format("%Y-%m-%d").to_string();
    writer.write_record([
      user.name.as_str(),
      user.username.as_str(),
      user.phone.as_deref().unwrap_or(""),
      user.company.as_deref().unwrap_or(""),
      user.plan.as_str(),
      user.status.as_str(),
      user.meta_account_id.as_deref().unwrap_or(""),
      joined.as_str(),
    ])?;
  }

  let bytes = writer
    .into_inner()
    .map_err(|e| csv::Error::from(e.into_error()))?;
  let body = String::from_utf8(bytes).map_err(|e| csv::Error::from(std::io::Error::other(e)))?;
  Ok(format!("{UTF8_BOM}{body}"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};

  fn user(name: &str, phone: Option<&str>) -> UserRow {
    let created = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();
    UserRow {
      id: 1,
      username: "client1".to_string(),
      name: name.to_string(),
      phone: phone.map(str::to_string),
      company: None,
      plan: "basic".to_string(),
      status: "active".to_string(),
      role: "client".to_string(),
      meta_account_id: Some("act_1".to_string()),
      campaign_id: None,
      created_at: created,
      updated_at: created,
    }
  }

  #[test]
  fn csv_starts_with_bom_and_quotes_every_cell() {
    let out = export_users_csv(&[user("Kim \"Dohun\"", Some("010-1234"))]).unwrap();
    assert!(out.starts_with(UTF8_BOM));

    let mut lines = out.trim_start_matches(UTF8_BOM).lines();
    assert_eq!(
      lines.next().unwrap(),
      r#""Name","Username","Phone","Company","Plan","Status","Meta Account ID","Joined""#
    );
    assert_eq!(
      lines.next().unwrap(),
      r#""Kim ""Dohun""","client1","010-1234","","basic","active","act_1","2026-02-03""#
    );
    assert!(lines.next().is_none());
  }

  #[test]
  fn filename_carries_the_date() {
    let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
    assert_eq!(export_filename(day), "users_2026-10-19.csv");
  }
}
