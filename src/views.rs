use std::fmt::Write;

use crate::models::{ArtistId, UpcomingGig};

/// Title-cased display name, `metro_jethros` -> `Metro Jethros`.
pub fn display_name(artist: &ArtistId) -> String {
    artist
        .as_str()
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn countdown(days_until: i64) -> String {
    match days_until {
        0 => "Tonight".to_string(),
        1 => "Tomorrow".to_string(),
        n => format!("In {n} days"),
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_gig_page(artist: &ArtistId, gigs: &[UpcomingGig]) -> String {
    let name = escape_html(&display_name(artist));
    let mut page = String::new();
    let _ = write!(
        page,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{name} - Upcoming Gigs</title>\n</head>\n<body>\n<h1>{name}</h1>\n"
    );

    if gigs.is_empty() {
        page.push_str("<p class=\"empty\">No upcoming gigs.</p>\n");
    } else {
        page.push_str("<ul class=\"gigs\">\n");
        for item in gigs {
            let date = item
                .gig
                .parsed_date()
                .map(|d| d.format("%B %-d, %Y").to_string())
                .unwrap_or_else(|| item.gig.date.clone());
            let _ = write!(
                page,
                "<li><time datetime=\"{iso}\">{date}</time> \
                 <span class=\"venue\">{venue}</span> \
                 <span class=\"city\">{city}</span> \
                 <span class=\"time\">{time}</span> \
                 <span class=\"countdown\">{countdown}</span></li>\n",
                iso = escape_html(&item.gig.date),
                date = escape_html(&date),
                venue = escape_html(&item.gig.venue),
                city = escape_html(&item.gig.city),
                time = escape_html(&item.gig.time),
                countdown = countdown(item.days_until),
            );
        }
        page.push_str("</ul>\n");
    }

    page.push_str("</body>\n</html>\n");
    page
}
