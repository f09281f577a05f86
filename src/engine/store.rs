use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::MAX_SEARCH_RESULTS;
use crate::model::*;

/// The service type catalog, services, professionals and both kinds of
/// client. Appointments live in
/// the engine's day partitions, not here.
pub struct Directory {
    service_types: DashMap<Ulid, ServiceType>,
    services: DashMap<Ulid, Service>,
    professionals: DashMap<Ulid, Professional>,
    clients: DashMap<Ulid, Client>,
    walk_ins: DashMap<Ulid, WalkInClient>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        Self {
            service_types: DashMap::new(),
            services: DashMap::new(),
            professionals: DashMap::new(),
            clients: DashMap::new(),
            walk_ins: DashMap::new(),
        }
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn professional(&self, id: &Ulid) -> Option<Professional> {
        self.professionals.get(id).map(|e| e.value().clone())
    }

    pub fn client(&self, id: &Ulid) -> Option<Client> {
        self.clients.get(id).map(|e| e.value().clone())
    }

    pub fn walk_in(&self, id: &Ulid) -> Option<WalkInClient> {
        self.walk_ins.get(id).map(|e| e.value().clone())
    }

    /// Catalog entry whose name matches `name`, ignoring case and
    /// surrounding whitespace.
    pub fn service_type_named(&self, name: &str) -> Option<ServiceType> {
        let name = name.trim();
        self.service_types
            .iter()
            .find(|t| t.name.to_lowercase() == name.to_lowercase())
            .map(|e| e.value().clone())
    }

    /// The catalog sorted by name.
    pub fn list_service_types(&self) -> Vec<ServiceType> {
        let mut out: Vec<ServiceType> = self.service_types.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub fn service_type_count(&self) -> usize {
        self.service_types.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn professional_count(&self) -> usize {
        self.professionals.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len() + self.walk_ins.len()
    }

    /// Any id already used by a directory entity.
    pub fn contains_id(&self, id: &Ulid) -> bool {
        self.services.contains_key(id)
            || self.service_types.contains_key(id)
            || self.professionals.contains_key(id)
            || self.clients.contains_key(id)
            || self.walk_ins.contains_key(id)
    }

    /// Display name and email of whoever an appointment is for.
    pub fn contact(&self, booked_by: BookedBy) -> Option<(String, Option<String>)> {
        match booked_by {
            BookedBy::Client(id) => self.client(&id).map(|c| (c.name, c.email)),
            BookedBy::WalkIn(id) => self.walk_in(&id).map(|w| (w.name, None)),
        }
    }

    pub fn booked_by_exists(&self, booked_by: BookedBy) -> bool {
        match booked_by {
            BookedBy::Client(id) => self.clients.contains_key(&id),
            BookedBy::WalkIn(id) => self.walk_ins.contains_key(&id),
        }
    }

    pub fn has_active_services(&self, professional_id: Ulid) -> bool {
        self.services
            .iter()
            .any(|s| s.active && s.professional_id == Some(professional_id))
    }

    /// Services sorted by name.
    pub fn list_services(&self, professional_id: Option<Ulid>, active: Option<bool>) -> Vec<Service> {
        let mut out: Vec<Service> = self
            .services
            .iter()
            .filter(|s| professional_id.is_none_or(|pid| s.professional_id == Some(pid)))
            .filter(|s| active.is_none_or(|a| s.active == a))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub fn list_professionals(&self, active: Option<bool>) -> Vec<Professional> {
        let mut out: Vec<Professional> = self
            .professionals
            .iter()
            .filter(|p| active.is_none_or(|a| p.active == a))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Case-insensitive substring match on name or phone over registered and
    /// walk-in clients. Phone matching ignores punctuation in the needle.
    pub fn search_clients(&self, needle: &str) -> Vec<ClientMatch> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let digits: String = needle.chars().filter(char::is_ascii_digit).collect();
        let hit = |name: &str, phone: Option<&str>| {
            name.to_lowercase().contains(&needle)
                || phone.is_some_and(|p| {
                    p.to_lowercase().contains(&needle) || (!digits.is_empty() && p.contains(&digits))
                })
        };

        let mut out: Vec<ClientMatch> = self
            .clients
            .iter()
            .filter(|c| hit(&c.name, c.phone.as_deref()))
            .map(|c| ClientMatch {
                id: c.id,
                name: c.name.clone(),
                phone: c.phone.clone(),
                walk_in: false,
            })
            .chain(
                self.walk_ins
                    .iter()
                    .filter(|w| hit(&w.name, Some(&w.phone)))
                    .map(|w| ClientMatch {
                        id: w.id,
                        name: w.name.clone(),
                        phone: Some(w.phone.clone()),
                        walk_in: true,
                    }),
            )
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out.truncate(MAX_SEARCH_RESULTS);
        out
    }

    // ── Event application ────────────────────────────────────

    /// Apply a directory event. Appointment events are ignored here.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::ProfessionalCreated(p) | Event::ProfessionalUpdated(p) => {
                self.professionals.insert(p.id, p.clone());
            }
            Event::ServiceCreated(s) | Event::ServiceUpdated(s) => {
                self.services.insert(s.id, s.clone());
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
            }
            Event::ServiceTypeCreated(t) => {
                self.service_types.insert(t.id, t.clone());
            }
            Event::ClientCreated(c) => {
                self.clients.insert(c.id, c.clone());
            }
            Event::WalkInCreated(w) => {
                self.walk_ins.insert(w.id, w.clone());
            }
            Event::AppointmentBooked { .. } | Event::AppointmentStatusChanged { .. } => {}
        }
    }

    /// Creation events that rebuild the directory, for compaction.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for t in self.service_types.iter() {
            events.push(Event::ServiceTypeCreated(t.value().clone()));
        }
        for p in self.professionals.iter() {
            events.push(Event::ProfessionalCreated(p.value().clone()));
        }
        for s in self.services.iter() {
            events.push(Event::ServiceCreated(s.value().clone()));
        }
        for c in self.clients.iter() {
            events.push(Event::ClientCreated(c.value().clone()));
        }
        for w in self.walk_ins.iter() {
            events.push(Event::WalkInCreated(w.value().clone()));
        }
        events
    }
}

/// Keep only the digits of a phone number.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}
