use std::collections::HashMap;

use serde::Serialize;

use super::title::display_title;

/// Category assigned to browser tabs that show a browser's own start screen.
pub const IDLE_CATEGORY: &str = "Browser (Idle)";

const IDLE_TITLES: &[&str] = &[
    "new tab",
    "new page",
    "start page",
    "home",
    "blank page",
    "speed dial",
    "google chrome",
    "mozilla firefox",
    "microsoft edge",
    "zen browser",
    "brave",
    "opera",
    "vivaldi",
];

#[derive(Debug, Clone, Copy)]
pub struct CategoryRule {
    pub name: &'static str,
    /// Lowercase substrings, any of which selects the rule.
    pub patterns: &'static [&'static str],
    pub priority: u8,
}

const fn rule(name: &'static str, patterns: &'static [&'static str], priority: u8) -> CategoryRule {
    CategoryRule {
        name,
        patterns,
        priority,
    }
}

const DEFAULT_RULES: &[CategoryRule] = &[
    rule("YouTube", &["youtube.com", "youtu.be", "- youtube", "| youtube"], 100),
    rule("GitHub", &["github.com", "· github", "- github", "| github", "/github"], 100),
    rule("GitLab", &["gitlab.com", "- gitlab", "| gitlab"], 100),
    rule("Instagram", &["instagram.com", "- instagram", "| instagram"], 100),
    rule("Twitter/X", &["twitter.com", "x.com/", "/ x", "| x", "- x"], 100),
    rule("Facebook", &["facebook.com", "- facebook", "| facebook"], 100),
    rule("Reddit", &["reddit.com", "- reddit", "| reddit"], 100),
    rule("LinkedIn", &["linkedin.com", "- linkedin", "| linkedin"], 100),
    rule("TikTok", &["tiktok.com", "- tiktok", "| tiktok"], 100),
    rule("Netflix", &["netflix.com", "- netflix", "| netflix"], 100),
    rule("Prime Video", &["primevideo.com", "amazon.com/gp/video", "- prime video"], 100),
    rule("Hotstar", &["hotstar.com", "- hotstar", "disney+ hotstar"], 100),
    rule("JioCinema", &["jiocinema.com", "- jiocinema"], 100),
    rule("Spotify", &["spotify.com", "- spotify", "| spotify"], 100),
    rule("Twitch", &["twitch.tv", "- twitch", "| twitch"], 100),
    rule("Discord", &["discord.com", "- discord", "| discord"], 100),
    rule("Slack", &["slack.com", "- slack", "| slack"], 100),
    rule("WhatsApp", &["web.whatsapp.com", "- whatsapp"], 100),
    rule("Telegram", &["web.telegram.org", "- telegram"], 100),
    rule("Gmail", &["mail.google.com", "- gmail", "| gmail", "inbox -"], 100),
    rule("Outlook", &["outlook.live.com", "outlook.office.com", "- outlook"], 100),
    rule("Google Drive", &["drive.google.com", "- google drive"], 100),
    rule("Google Docs", &["docs.google.com", "- google docs"], 100),
    rule("Google Sheets", &["sheets.google.com", "- google sheets"], 100),
    rule("Google Meet", &["meet.google.com", "- google meet"], 100),
    rule("Zoom", &["zoom.us", "- zoom", "| zoom"], 100),
    rule("Microsoft Teams", &["teams.microsoft.com", "- microsoft teams", "| teams"], 100),
    rule("Notion", &["notion.so", "- notion", "| notion"], 100),
    rule("Figma", &["figma.com", "- figma", "| figma"], 100),
    rule("Canva", &["canva.com", "- canva", "| canva"], 100),
    rule("Trello", &["trello.com", "- trello", "| trello"], 100),
    rule("Asana", &["asana.com", "- asana", "| asana"], 100),
    rule("Jira", &["atlassian.net", "- jira", "| jira"], 100),
    rule("StackOverflow", &["stackoverflow.com", "- stack overflow"], 100),
    rule("LeetCode", &["leetcode.com", "- leetcode", "| leetcode"], 100),
    rule("HackerRank", &["hackerrank.com", "- hackerrank"], 100),
    rule("Codeforces", &["codeforces.com", "- codeforces"], 100),
    rule("Medium", &["medium.com", "- medium", "| medium"], 100),
    rule("Dev.to", &["dev.to", "- dev community"], 100),
    rule("Quora", &["quora.com", "- quora", "| quora"], 100),
    rule("Pinterest", &["pinterest.com", "- pinterest", "| pinterest"], 100),
    rule("Snapchat", &["snapchat.com", "- snapchat"], 100),
    rule("Amazon", &["amazon.in", "amazon.com", "- amazon"], 90),
    rule("Flipkart", &["flipkart.com", "- flipkart"], 100),
    rule("Myntra", &["myntra.com", "- myntra"], 100),
    rule("Swiggy", &["swiggy.com", "- swiggy"], 100),
    rule("Zomato", &["zomato.com", "- zomato"], 100),
    rule("Uber", &["uber.com", "- uber"], 100),
    rule("Ola", &["olacabs.com", "- ola"], 100),
    rule("ChatGPT", &["chat.openai.com", "chatgpt.com", "- chatgpt"], 100),
    rule("Claude", &["claude.ai", "- claude"], 100),
    rule("Google Gemini", &["gemini.google.com", "- gemini"], 100),
    rule("Perplexity", &["perplexity.ai", "- perplexity"], 100),
    rule("Unstop", &["unstop.com", "// unstop"], 100),
    rule("Internshala", &["internshala.com", "- internshala"], 100),
    rule("Naukri", &["naukri.com", "- naukri"], 100),
    rule("GeeksforGeeks", &["geeksforgeeks.org", "- geeksforgeeks"], 100),
    rule("W3Schools", &["w3schools.com", "- w3schools"], 100),
    rule("MDN", &["developer.mozilla.org", "- mdn"], 100),
    rule("docs.rs", &["docs.rs", "- docs.rs"], 100),
    rule("crates.io", &["crates.io", "- crates.io"], 100),
    rule("VS Code", &["- visual studio code", "vscode"], 100),
    rule("CodePen", &["codepen.io", "- codepen"], 100),
    rule("Replit", &["replit.com", "- replit"], 100),
    rule("Vercel", &["vercel.com", "- vercel"], 100),
    rule("Netlify", &["netlify.com", "- netlify"], 100),
    rule("AWS", &["aws.amazon.com", "console.aws", "- aws"], 100),
    rule("Google Cloud", &["console.cloud.google", "- google cloud"], 100),
    rule("Azure", &["portal.azure.com", "- azure"], 100),
    rule("Coursera", &["coursera.org", "- coursera"], 100),
    rule("Udemy", &["udemy.com", "- udemy"], 100),
    rule("Khan Academy", &["khanacademy.org", "- khan academy"], 100),
    rule("Wikipedia", &["wikipedia.org", "- wikipedia"], 100),
    rule("Google Search", &["google.com/search", "- google search"], 90),
    rule("Bing", &["bing.com/search", "- bing"], 90),
    rule("DuckDuckGo", &["duckduckgo.com", "- duckduckgo"], 100),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// A browser start screen.
    Idle,
    Named(&'static str),
    Uncategorized,
}

/// Ordered rule table. When several rules match, the highest priority wins and ties go to the
/// rule declared first.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
    idle_titles: Vec<&'static str>,
}

impl CategoryTable {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self {
            rules,
            idle_titles: IDLE_TITLES.to_vec(),
        }
    }

    pub fn categorize(&self, title: &str) -> Category {
        if title.is_empty() {
            return Category::Uncategorized;
        }

        let title = title.to_lowercase();
        if self.idle_titles.contains(&title.as_str()) {
            return Category::Idle;
        }

        let mut best: Option<&CategoryRule> = None;
        for rule in &self.rules {
            if rule.patterns.iter().any(|pattern| title.contains(pattern)) {
                match best {
                    Some(current) if current.priority >= rule.priority => {}
                    _ => best = Some(rule),
                }
            }
        }

        best.map_or(Category::Uncategorized, |rule| Category::Named(rule.name))
    }

    /// Groups per-title totals into categories, ranked by category total. Uncategorized titles
    /// form a group of their own named after the title; idle screens are collapsed without
    /// per-title detail.
    pub fn group<'a>(&self, entries: impl IntoIterator<Item = (&'a str, i64)>) -> Vec<BrowsingGroup> {
        let mut groups: Vec<BrowsingGroup> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (title, secs) in entries {
            let (name, member) = match self.categorize(title) {
                Category::Idle => (IDLE_CATEGORY.to_string(), None),
                Category::Named(name) => (
                    name.to_string(),
                    Some(GroupMember {
                        title: display_title(title),
                        total_secs: secs,
                    }),
                ),
                Category::Uncategorized => (title.to_string(), None),
            };

            let position = *positions.entry(name.clone()).or_insert_with(|| {
                groups.push(BrowsingGroup {
                    category: name,
                    total_secs: 0,
                    members: vec![],
                });
                groups.len() - 1
            });
            let group = &mut groups[position];
            group.total_secs += secs;
            group.members.extend(member);
        }

        // Stable, so equal totals keep first-seen order.
        groups.sort_by(|a, b| b.total_secs.cmp(&a.total_secs));
        groups
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::new(DEFAULT_RULES.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowsingGroup {
    pub category: String,
    pub total_secs: i64,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub title: String,
    pub total_secs: i64,
}
