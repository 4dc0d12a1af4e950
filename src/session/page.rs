//! Embedded question renderer
//!
//! The single-page UI served at `/`. It connects to `/ws`, renders each
//! pushed question as a card, and posts the answer back as a `response`
//! frame. The page is deliberately framework-free so the binary stays
//! self-contained.

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Branchboard</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            max-width: 640px;
            margin: 40px auto;
            padding: 0 20px;
            background: #1a1a2e;
            color: #eee;
        }
        h1 { color: #4ade80; font-size: 1.4em; }
        .card {
            background: #2a2a4e;
            border-radius: 8px;
            padding: 16px;
            margin: 12px 0;
        }
        .card .context { color: #9ca3af; font-size: 0.85em; margin-bottom: 6px; }
        .card .question { margin-bottom: 10px; }
        .card button {
            background: #4ade80;
            border: none;
            border-radius: 6px;
            color: #14141e;
            padding: 6px 14px;
            margin: 3px 6px 3px 0;
            cursor: pointer;
        }
        .card button.secondary { background: #475569; color: #eee; }
        .card textarea, .card input[type=text] {
            width: 100%;
            box-sizing: border-box;
            background: #14142e;
            color: #eee;
            border: 1px solid #475569;
            border-radius: 6px;
            padding: 8px;
            margin-bottom: 8px;
        }
        .section { border-left: 3px solid #4ade80; padding-left: 10px; margin: 10px 0; }
        #status { color: #9ca3af; font-size: 0.85em; }
    </style>
</head>
<body>
    <h1>Branchboard</h1>
    <div id="status">connecting…</div>
    <div id="cards"></div>
    <script>
    (function () {
        const cards = document.getElementById('cards');
        const status = document.getElementById('status');
        const ws = new WebSocket('ws://' + location.host + '/ws');

        ws.onopen = function () {
            status.textContent = 'connected';
            ws.send(JSON.stringify({ type: 'connected' }));
        };
        ws.onclose = function () { status.textContent = 'session closed'; };

        ws.onmessage = function (event) {
            let frame;
            try { frame = JSON.parse(event.data); } catch (e) { return; }
            if (frame.type === 'question') renderQuestion(frame);
            else if (frame.type === 'cancel') removeCard(frame.id);
            else if (frame.type === 'end') endSession();
        };

        function answer(id, payload) {
            ws.send(JSON.stringify({ type: 'response', id: id, answer: payload }));
            removeCard(id);
        }

        function removeCard(id) {
            const card = document.getElementById('card-' + id);
            if (card) card.remove();
        }

        function endSession() {
            status.textContent = 'session closed';
            cards.querySelectorAll('button, textarea, input').forEach(function (el) {
                el.disabled = true;
            });
        }

        function el(tag, props, children) {
            const node = document.createElement(tag);
            Object.assign(node, props || {});
            (children || []).forEach(function (c) { node.appendChild(c); });
            return node;
        }

        function renderQuestion(frame) {
            removeCard(frame.id);
            const cfg = frame.config || {};
            const card = el('div', { className: 'card', id: 'card-' + frame.id });
            if (cfg.context) card.appendChild(el('div', { className: 'context', textContent: cfg.context }));
            card.appendChild(el('div', { className: 'question', textContent: cfg.question || cfg.title || frame.questionType }));

            switch (frame.questionType) {
                case 'pick_one':
                case 'show_options':
                    (cfg.options || []).forEach(function (opt) {
                        card.appendChild(el('button', {
                            textContent: opt.label || opt.id,
                            onclick: function () { answer(frame.id, { selected: opt.id }); }
                        }));
                    });
                    break;
                case 'pick_many': {
                    const chosen = [];
                    (cfg.options || []).forEach(function (opt) {
                        const btn = el('button', { className: 'secondary', textContent: opt.label || opt.id });
                        btn.onclick = function () {
                            const idx = chosen.indexOf(opt.id);
                            if (idx >= 0) { chosen.splice(idx, 1); btn.className = 'secondary'; }
                            else { chosen.push(opt.id); btn.className = ''; }
                        };
                        card.appendChild(btn);
                    });
                    card.appendChild(el('button', {
                        textContent: 'Submit',
                        onclick: function () { answer(frame.id, { selected: chosen }); }
                    }));
                    break;
                }
                case 'confirm':
                    ['yes', 'no', 'cancel'].forEach(function (choice) {
                        card.appendChild(el('button', {
                            className: choice === 'yes' ? '' : 'secondary',
                            textContent: choice,
                            onclick: function () { answer(frame.id, { choice: choice }); }
                        }));
                    });
                    break;
                case 'thumbs':
                    ['up', 'down'].forEach(function (choice) {
                        card.appendChild(el('button', {
                            textContent: choice === 'up' ? '👍' : '👎',
                            onclick: function () { answer(frame.id, { choice: choice }); }
                        }));
                    });
                    break;
                case 'emoji_react':
                    (cfg.options || ['👍', '🎉', '🤔', '👎']).forEach(function (emoji) {
                        card.appendChild(el('button', {
                            textContent: emoji,
                            onclick: function () { answer(frame.id, { choice: emoji }); }
                        }));
                    });
                    break;
                case 'slider': {
                    const input = el('input', { type: 'range' });
                    input.min = cfg.min != null ? cfg.min : 0;
                    input.max = cfg.max != null ? cfg.max : 10;
                    card.appendChild(input);
                    card.appendChild(el('button', {
                        textContent: 'Submit',
                        onclick: function () { answer(frame.id, { value: Number(input.value) }); }
                    }));
                    break;
                }
                case 'show_plan': {
                    (cfg.sections || []).forEach(function (section) {
                        const div = el('div', { className: 'section' });
                        div.appendChild(el('strong', { textContent: section.title || section.id }));
                        div.appendChild(el('div', { textContent: section.content || '' }));
                        card.appendChild(div);
                    });
                    card.appendChild(el('button', {
                        textContent: 'Approve',
                        onclick: function () { answer(frame.id, { approved: true }); }
                    }));
                    card.appendChild(el('button', {
                        className: 'secondary',
                        textContent: 'Request changes',
                        onclick: function () {
                            const note = prompt('What should change?') || '';
                            answer(frame.id, { approved: false, feedback: note });
                        }
                    }));
                    break;
                }
                default: {
                    // ask_text, ask_code, show_diff, rank, rate, review_section
                    // and anything unrecognized fall back to free text
                    const input = el('textarea', { rows: 3, placeholder: cfg.placeholder || '' });
                    card.appendChild(input);
                    card.appendChild(el('button', {
                        textContent: 'Submit',
                        onclick: function () { answer(frame.id, { text: input.value }); }
                    }));
                }
            }

            cards.appendChild(card);
        }
    })();
    </script>
</body>
</html>"#;
