//! Idle/focus coordinator.
//!
//! Reconciles the host's tab, window and idle signals into the four session
//! operations the tracker understands. The coordinator holds no timing state
//! of its own; it only remembers which tab is in front and whether the user
//! is idle.

use tracing::debug;

use webtime_core::{Domain, Locator};
use webtime_protocol::{FocusState, IdleState};

/// Normalised host signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    TabActivated {
        tab_id: i64,
        url: String,
        favicon_url: Option<String>,
    },
    TabUpdated {
        tab_id: i64,
        url: Option<String>,
        favicon_url: Option<String>,
    },
    TabRemoved {
        tab_id: i64,
    },
    WindowFocusChanged {
        focused: bool,
        tab_id: Option<i64>,
        url: Option<String>,
        favicon_url: Option<String>,
    },
    IdleStateChanged(IdleState),
}

/// What the tracker has to do in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusAction {
    /// Flush the previous visit and open a new one.
    Start {
        domain: Domain,
        favicon_url: Option<String>,
        paused: bool,
    },
    /// Same site still in front; flush and optionally learn its favicon.
    Continue { favicon_url: Option<String> },
    Stop,
    Pause,
    Resume,
    Ignore,
}

#[derive(Debug, Default)]
pub struct FocusCoordinator {
    tab_id: Option<i64>,
    domain: Option<Domain>,
    idle: bool,
}

impl FocusCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FocusState {
        match (&self.domain, self.idle) {
            (_, true) => FocusState::Idle,
            (Some(_), false) => FocusState::Tracking,
            (None, false) => FocusState::NoFocus,
        }
    }

    pub fn tab_id(&self) -> Option<i64> {
        self.tab_id
    }

    /// Tab currently showing `domain`, if it is the one in front.
    pub fn tab_showing(&self, domain: &Domain) -> Option<i64> {
        match &self.domain {
            Some(current) if current == domain => self.tab_id,
            _ => None,
        }
    }

    pub fn on_event(&mut self, event: HostEvent) -> FocusAction {
        let action = match event {
            HostEvent::TabActivated {
                tab_id,
                url,
                favicon_url,
            } => self.focus_tab(tab_id, &url, favicon_url),

            HostEvent::TabUpdated {
                tab_id,
                url,
                favicon_url,
            } => {
                if self.tab_id != Some(tab_id) {
                    return FocusAction::Ignore;
                }
                match url {
                    Some(url) => self.navigate(tab_id, &url, favicon_url),
                    None if self.domain.is_some() => FocusAction::Continue { favicon_url },
                    None => FocusAction::Ignore,
                }
            }

            HostEvent::TabRemoved { tab_id } => {
                if self.tab_id != Some(tab_id) {
                    return FocusAction::Ignore;
                }
                self.lose_focus()
            }

            HostEvent::WindowFocusChanged {
                focused: false, ..
            } => self.lose_focus(),

            HostEvent::WindowFocusChanged {
                focused: true,
                tab_id: Some(tab_id),
                url: Some(url),
                favicon_url,
            } => self.focus_tab(tab_id, &url, favicon_url),

            HostEvent::WindowFocusChanged { focused: true, .. } => FocusAction::Ignore,

            HostEvent::IdleStateChanged(IdleState::Idle | IdleState::Locked) => {
                if self.idle {
                    FocusAction::Ignore
                } else {
                    self.idle = true;
                    FocusAction::Pause
                }
            }

            HostEvent::IdleStateChanged(IdleState::Active) => {
                if self.idle {
                    self.idle = false;
                    FocusAction::Resume
                } else {
                    FocusAction::Ignore
                }
            }
        };

        debug!(action = ?action, state = ?self.state(), "Focus event handled");
        action
    }

    fn focus_tab(&mut self, tab_id: i64, url: &str, favicon_url: Option<String>) -> FocusAction {
        self.tab_id = Some(tab_id);
        self.open(url, favicon_url)
    }

    fn navigate(&mut self, tab_id: i64, url: &str, favicon_url: Option<String>) -> FocusAction {
        let locator = Locator::classify(url);
        let same_site = locator.domain().is_some() && locator.domain() == self.domain.as_ref();
        if same_site {
            self.tab_id = Some(tab_id);
            FocusAction::Continue { favicon_url }
        } else {
            self.focus_tab(tab_id, url, favicon_url)
        }
    }

    fn open(&mut self, url: &str, favicon_url: Option<String>) -> FocusAction {
        match Locator::classify(url) {
            Locator::Trackable(domain) => {
                self.domain = Some(domain.clone());
                FocusAction::Start {
                    domain,
                    favicon_url,
                    paused: self.idle,
                }
            }
            locator => {
                debug!(kind = locator.label(), "Untrackable page in front");
                self.domain = None;
                FocusAction::Stop
            }
        }
    }

    fn lose_focus(&mut self) -> FocusAction {
        self.tab_id = None;
        self.domain = None;
        FocusAction::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activate(tab_id: i64, url: &str) -> HostEvent {
        HostEvent::TabActivated {
            tab_id,
            url: url.to_string(),
            favicon_url: None,
        }
    }

    fn start_of(action: FocusAction) -> Option<String> {
        match action {
            FocusAction::Start { domain, .. } => Some(domain.to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_trackable_tab_starts_tracking() {
        let mut focus = FocusCoordinator::new();
        let action = focus.on_event(activate(1, "https://www.news.example/a"));
        assert_eq!(start_of(action), Some("news.example".to_string()));
        assert_eq!(focus.state(), FocusState::Tracking);
        assert_eq!(focus.tab_id(), Some(1));
    }

    #[test]
    fn test_internal_page_stops_tracking() {
        let mut focus = FocusCoordinator::new();
        focus.on_event(activate(1, "https://news.example/"));
        assert_eq!(focus.on_event(activate(2, "chrome://newtab")), FocusAction::Stop);
        assert_eq!(focus.state(), FocusState::NoFocus);
    }

    #[test]
    fn test_same_site_navigation_continues_visit() {
        let mut focus = FocusCoordinator::new();
        focus.on_event(activate(1, "https://news.example/"));

        let action = focus.on_event(HostEvent::TabUpdated {
            tab_id: 1,
            url: Some("https://news.example/world".to_string()),
            favicon_url: Some("https://news.example/favicon.ico".to_string()),
        });
        assert_eq!(
            action,
            FocusAction::Continue {
                favicon_url: Some("https://news.example/favicon.ico".to_string())
            }
        );

        let action = focus.on_event(HostEvent::TabUpdated {
            tab_id: 1,
            url: Some("https://video.example/".to_string()),
            favicon_url: None,
        });
        assert_eq!(start_of(action), Some("video.example".to_string()));
    }

    #[test]
    fn test_background_tab_updates_ignored() {
        let mut focus = FocusCoordinator::new();
        focus.on_event(activate(1, "https://news.example/"));
        let action = focus.on_event(HostEvent::TabUpdated {
            tab_id: 2,
            url: Some("https://video.example/".to_string()),
            favicon_url: None,
        });
        assert_eq!(action, FocusAction::Ignore);
        assert_eq!(focus.on_event(HostEvent::TabRemoved { tab_id: 2 }), FocusAction::Ignore);
    }

    #[test]
    fn test_closing_tracked_tab_stops() {
        let mut focus = FocusCoordinator::new();
        focus.on_event(activate(1, "https://news.example/"));
        assert_eq!(focus.on_event(HostEvent::TabRemoved { tab_id: 1 }), FocusAction::Stop);
        assert_eq!(focus.tab_id(), None);
    }

    #[test]
    fn test_window_focus() {
        let mut focus = FocusCoordinator::new();
        focus.on_event(activate(1, "https://news.example/"));

        let lost = HostEvent::WindowFocusChanged {
            focused: false,
            tab_id: None,
            url: None,
            favicon_url: None,
        };
        assert_eq!(focus.on_event(lost), FocusAction::Stop);
        assert_eq!(focus.state(), FocusState::NoFocus);

        let gained = HostEvent::WindowFocusChanged {
            focused: true,
            tab_id: Some(4),
            url: Some("https://docs.example/".to_string()),
            favicon_url: None,
        };
        assert_eq!(start_of(focus.on_event(gained)), Some("docs.example".to_string()));
        assert_eq!(focus.tab_id(), Some(4));
    }

    #[test]
    fn test_idle_cycle() {
        let mut focus = FocusCoordinator::new();
        focus.on_event(activate(1, "https://news.example/"));

        assert_eq!(
            focus.on_event(HostEvent::IdleStateChanged(IdleState::Idle)),
            FocusAction::Pause
        );
        assert_eq!(focus.state(), FocusState::Idle);
        assert_eq!(
            focus.on_event(HostEvent::IdleStateChanged(IdleState::Locked)),
            FocusAction::Ignore
        );

        // A tab switch while idle opens the visit paused.
        let action = focus.on_event(activate(2, "https://docs.example/"));
        assert!(matches!(action, FocusAction::Start { paused: true, .. }));

        assert_eq!(
            focus.on_event(HostEvent::IdleStateChanged(IdleState::Active)),
            FocusAction::Resume
        );
        assert_eq!(focus.state(), FocusState::Tracking);
    }

    #[test]
    fn test_tab_showing() {
        let mut focus = FocusCoordinator::new();
        focus.on_event(activate(9, "https://news.example/"));
        let news = Domain::parse("news.example").unwrap();
        let other = Domain::parse("docs.example").unwrap();
        assert_eq!(focus.tab_showing(&news), Some(9));
        assert_eq!(focus.tab_showing(&other), None);
    }
}
